use crate::Vector3;

/// An axis-aligned box, described by its center and the half-length of one
/// edge (octree cells are cubes, so a single scalar half-extent suffices).
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub center: Vector3,
    pub half_extent: f32,
}

impl Aabb {
    pub fn new(center: Vector3, half_extent: f32) -> Self {
        Self { center, half_extent }
    }

    pub fn min(&self) -> Vector3 {
        self.center - Vector3::splat(self.half_extent)
    }

    pub fn max(&self) -> Vector3 {
        self.center + Vector3::splat(self.half_extent)
    }

    /// A copy of this box grown by `amount` on every side.
    pub fn expanded(&self, amount: f32) -> Self {
        Self { center: self.center, half_extent: self.half_extent + amount }
    }

    pub fn contains(&self, p: &Vector3) -> bool {
        let min = self.min();
        let max = self.max();
        (0..3).all(|i| p[i] >= min[i] && p[i] <= max[i])
    }
}

/// The Akenine-Möller separating-axis test for a triangle against an
/// axis-aligned box, expanded by `expansion` on every side before the test
/// (used to add agent radius clearance). Symmetric in the three triangle
/// vertices: permuting `p1, p2, p3` never changes the result, since the 13
/// candidate axes only depend on the triangle's edge set and normal, both of
/// which are permutation-invariant as *sets*.
pub fn triangle_intersects_aabb(
    p1: Vector3,
    p2: Vector3,
    p3: Vector3,
    box_: &Aabb,
    expansion: f32,
) -> bool {
    let half = box_.half_extent + expansion;
    let extents = Vector3::splat(half);

    // Translate the triangle into box-local space.
    let v0 = p1 - box_.center;
    let v1 = p2 - box_.center;
    let v2 = p3 - box_.center;

    let edges = [v1 - v0, v2 - v1, v0 - v2];
    let axes = [
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ];

    // 9 edge-cross-axis tests.
    for edge in edges.iter() {
        for axis in axes.iter() {
            let a = axis.cross(edge);
            if a.sqr_length() < 1e-20 {
                // Edge parallel to this box axis: cross product is ~zero and
                // gives no separating information.
                continue;
            }
            if separated_on_axis(&a, &v0, &v1, &v2, &extents) {
                return false;
            }
        }
    }

    // 3 box-face-normal tests (equivalent to a plain per-axis overlap test).
    for axis in axes.iter() {
        if separated_on_axis(axis, &v0, &v1, &v2, &extents) {
            return false;
        }
    }

    // Triangle-normal test.
    let normal = edges[0].cross(&edges[1]);
    if separated_on_axis(&normal, &v0, &v1, &v2, &extents) {
        return false;
    }

    true
}

fn separated_on_axis(
    axis: &Vector3,
    v0: &Vector3,
    v1: &Vector3,
    v2: &Vector3,
    extents: &Vector3,
) -> bool {
    let p0 = axis.dot(v0);
    let p1 = axis.dot(v1);
    let p2 = axis.dot(v2);

    let r = extents.x * axis.x.abs() + extents.y * axis.y.abs() + extents.z * axis.z.abs();

    let min_p = p0.min(p1).min(p2);
    let max_p = p0.max(p1).max(p2);

    min_p > r || max_p < -r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_through_box_center_intersects() {
        let box_ = Aabb::new(Vector3::ZERO, 1.0);
        let p1 = Vector3::new(-2.0, 0.0, 0.0);
        let p2 = Vector3::new(2.0, 0.0, 0.0);
        let p3 = Vector3::new(0.0, 2.0, 0.0);
        assert!(triangle_intersects_aabb(p1, p2, p3, &box_, 0.0));
    }

    #[test]
    fn distant_triangle_does_not_intersect() {
        let box_ = Aabb::new(Vector3::ZERO, 1.0);
        let p1 = Vector3::new(10.0, 10.0, 10.0);
        let p2 = Vector3::new(11.0, 10.0, 10.0);
        let p3 = Vector3::new(10.0, 11.0, 10.0);
        assert!(!triangle_intersects_aabb(p1, p2, p3, &box_, 0.0));
    }

    #[test]
    fn sat_is_symmetric_in_vertex_order() {
        let box_ = Aabb::new(Vector3::new(0.3, 0.3, 0.3), 0.5);
        let p1 = Vector3::new(0.0, 0.0, 0.0);
        let p2 = Vector3::new(1.0, 0.0, 0.1);
        let p3 = Vector3::new(0.0, 1.0, 0.2);

        let perms = [
            (p1, p2, p3),
            (p2, p3, p1),
            (p3, p1, p2),
            (p1, p3, p2),
            (p2, p1, p3),
            (p3, p2, p1),
        ];
        let first = triangle_intersects_aabb(p1, p2, p3, &box_, 0.0);
        for (a, b, c) in perms {
            assert_eq!(triangle_intersects_aabb(a, b, c, &box_, 0.0), first);
        }
    }

    #[test]
    fn expansion_grows_the_effective_box() {
        let box_ = Aabb::new(Vector3::ZERO, 1.0);
        let p1 = Vector3::new(2.0, 0.0, 0.0);
        let p2 = Vector3::new(2.0, 1.0, 0.0);
        let p3 = Vector3::new(2.0, 0.0, 1.0);
        assert!(!triangle_intersects_aabb(p1, p2, p3, &box_, 0.0));
        assert!(triangle_intersects_aabb(p1, p2, p3, &box_, 1.5));
    }
}
