//! A minimal OFF (Object File Format) mesh loader, ported from the triangle
//! bulk-load loop in `Main.cpp`: a magic line, a vertex/face count line,
//! `vertexCount` vertex records, then `faceCount` face records — only
//! triangular faces are accepted. Vertices are affinely remapped into
//! `[0, 1]^3` by the same per-axis-min, single-uniform-scale transform the
//! original applies before handing triangles to the octree.

use navoctree_core::Vector3;
use std::str::SplitWhitespace;

#[derive(Debug, thiserror::Error)]
pub enum VoxError {
    #[error("not an OFF file")]
    BadMagic,
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("malformed number: {0:?}")]
    BadNumber(String),
    #[error("face {index} is not a triangle (has {vertex_count} vertices)")]
    NotATriangle { index: usize, vertex_count: u32 },
    #[error("vertex {index} has a negative {axis} coordinate ({value}) after normalisation")]
    NegativeCoordinate { index: usize, axis: char, value: f32 },
}

pub struct Mesh {
    pub vertices: Vec<Vector3>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    /// Resolves triangle `i`'s three vertex positions, for handing straight
    /// to `Octree::add_terrain_triangle_mesh`.
    pub fn triangle_positions(&self, triangle: [u32; 3]) -> (Vector3, Vector3, Vector3) {
        (
            self.vertices[triangle[0] as usize],
            self.vertices[triangle[1] as usize],
            self.vertices[triangle[2] as usize],
        )
    }
}

struct Tokens<'a>(SplitWhitespace<'a>);

impl<'a> Tokens<'a> {
    fn next(&mut self) -> Result<&'a str, VoxError> {
        self.0.next().ok_or(VoxError::UnexpectedEof)
    }

    fn next_u32(&mut self) -> Result<u32, VoxError> {
        let tok = self.next()?;
        tok.parse().map_err(|_| VoxError::BadNumber(tok.to_string()))
    }

    fn next_f32(&mut self) -> Result<f32, VoxError> {
        let tok = self.next()?;
        tok.parse().map_err(|_| VoxError::BadNumber(tok.to_string()))
    }
}

/// Parses `input` as an OFF document and normalises its vertices into
/// `[0, 1]^3`. A degenerate mesh (every vertex identical, so the per-axis
/// extent is zero on every axis) divides by zero exactly as the original
/// does — there's no epsilon guard here either.
pub fn load_off(input: &str) -> Result<Mesh, VoxError> {
    let mut tokens = Tokens(input.split_whitespace());

    let head = tokens.next()?;
    if !head.starts_with("OFF") {
        return Err(VoxError::BadMagic);
    }
    let (vertex_count, face_count) = if head == "OFF" {
        let v = tokens.next_u32()?;
        let f = tokens.next_u32()?;
        let _edges = tokens.next_u32()?;
        (v, f)
    } else {
        let v: u32 = head[3..].parse().map_err(|_| VoxError::BadNumber(head.to_string()))?;
        let f = tokens.next_u32()?;
        let _edges = tokens.next_u32()?;
        (v, f)
    };

    let mut vertices = Vec::with_capacity(vertex_count as usize);
    let mut min = Vector3::splat(f32::MAX);
    let mut max = Vector3::splat(f32::MIN);
    for _ in 0..vertex_count {
        let x = tokens.next_f32()?;
        let y = tokens.next_f32()?;
        let z = tokens.next_f32()?;
        let v = Vector3::new(x, y, z);
        min = min.min(&v);
        max = max.max(&v);
        vertices.push(v);
    }

    let extent = max - min;
    let scale = extent.x.max(extent.y).max(extent.z);
    for (index, v) in vertices.iter_mut().enumerate() {
        *v = (*v - min) / scale;
        if v.x < 0.0 {
            return Err(VoxError::NegativeCoordinate { index, axis: 'x', value: v.x });
        }
        if v.y < 0.0 {
            return Err(VoxError::NegativeCoordinate { index, axis: 'y', value: v.y });
        }
        if v.z < 0.0 {
            return Err(VoxError::NegativeCoordinate { index, axis: 'z', value: v.z });
        }
    }

    let mut triangles = Vec::with_capacity(face_count as usize);
    for index in 0..face_count as usize {
        let shape = tokens.next_u32()?;
        if shape != 3 {
            return Err(VoxError::NotATriangle { index, vertex_count: shape });
        }
        let i = tokens.next_u32()?;
        let j = tokens.next_u32()?;
        let k = tokens.next_u32()?;
        triangles.push([i, j, k]);
    }

    Ok(Mesh { vertices, triangles })
}
