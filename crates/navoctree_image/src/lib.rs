//! A 24-bit BMP writer for navoctree's color-graph export.
//!
//! Image serialization is exactly the concern the teacher's own
//! `building_blocks_image` crate owns, and it reaches for the `image` crate
//! rather than hand-writing a wire format; this crate does the same and
//! delegates the actual header/row encoding to `image::bmp::BMPEncoder`
//! instead of re-implementing `Bitmap.hpp`'s byte layout by hand.

use std::io::Write;

use image::bmp::BMPEncoder;
use image::ColorType;

#[derive(Debug, thiserror::Error)]
pub enum BmpError {
    #[error("color graph must be square (got {rows} rows of {cols} columns)")]
    NotSquare { rows: usize, cols: usize },
    #[error(transparent)]
    Encode(#[from] image::ImageError),
}

/// Writes `color_graph` (an `N x N` matrix of `[x, y, z]` channel triples in
/// `[0, 1]`, as produced by `navoctree_search::PathGraph::get_component_color_graph`)
/// as a 24-bit BMP to `writer`.
///
/// `image`'s BMP encoder takes its input buffer in conventional top-down row
/// order (buffer row 0 is the top of the displayed image) and flips it
/// internally to produce the format's bottom-up row order. The original
/// writer (`Bitmap.hpp`) never flips — it streams `colorGraph[0]` straight
/// out as the file's first (i.e. bottom) row — so rows are fed to the
/// encoder in reverse here to reproduce that same row correspondence: with
/// the reversal, `color_graph[0]` lands at the bottom of the decoded image,
/// same as the original.
///
/// Each `[x, y, z]` triple is pushed in `(x, y, z)` = `(red, green, blue)`
/// order; the BMP encoder writes the on-disk bytes as `(blue, green, red)`
/// per pixel, matching `spec.md` §6.4's channel layout.
pub fn write_bmp<W: Write>(color_graph: &[Vec<[f32; 3]>], writer: &mut W) -> Result<(), BmpError> {
    let height = color_graph.len();
    let width = color_graph.first().map(|row| row.len()).unwrap_or(0);
    if color_graph.iter().any(|row| row.len() != width) {
        return Err(BmpError::NotSquare { rows: height, cols: width });
    }

    let mut buffer = Vec::with_capacity(width * height * 3);
    for row in color_graph.iter().rev() {
        for &[x, y, z] in row {
            buffer.push(channel_byte(x));
            buffer.push(channel_byte(y));
            buffer.push(channel_byte(z));
        }
    }

    BMPEncoder::new(writer).encode(&buffer, width as u32, height as u32, ColorType::Rgb8)?;
    Ok(())
}

fn channel_byte(value: f32) -> u8 {
    (value * 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_image_crate_decoder() {
        let graph = vec![
            vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec![[0.5, 0.5, 0.5], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]],
            vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
        ];
        let mut bytes = Vec::new();
        write_bmp(&graph, &mut bytes).unwrap();

        assert_eq!(&bytes[0..2], b"BM");

        let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Bmp).unwrap().to_rgb8();
        assert_eq!(decoded.width(), 3);
        assert_eq!(decoded.height(), 3);
        // `graph[0]` was written so it decodes back at the bottom row.
        assert_eq!(decoded.get_pixel(0, 2).0, [255, 0, 0]);
        assert_eq!(decoded.get_pixel(2, 0).0, [0, 0, 0]);
    }

    #[test]
    fn non_square_graph_is_rejected() {
        let graph = vec![vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]], vec![[0.0, 0.0, 0.0]]];
        let mut bytes = Vec::new();
        assert!(write_bmp(&graph, &mut bytes).is_err());
    }

    #[test]
    fn channel_byte_clamps_overflow() {
        assert_eq!(channel_byte(2.0), 255);
        assert_eq!(channel_byte(-1.0), 0);
        assert_eq!(channel_byte(1.0), 255);
    }
}
