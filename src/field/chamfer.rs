//! Two-pass chamfer propagation over offset-accumulating pixels.
//!
//! Each pass relaxes 4/8-neighbor distances while tracking the running offset
//! vector to the seeding edge pixel, so the result carries both the distance
//! and the direction to the nearest boundary. Shared by the frame-level
//! distance field and the per-class template maps.

use super::FieldPixel;

/// Forward pass neighbors (dx, dy): W, NW, N, NE.
const FORWARD: [(i64, i64); 4] = [(-1, 0), (-1, -1), (0, -1), (1, -1)];
/// Backward pass neighbors: E, SE, S, SW.
const BACKWARD: [(i64, i64); 4] = [(1, 0), (1, 1), (0, 1), (-1, 1)];

#[inline]
fn offset_len(off: (i16, i16)) -> f32 {
    let (dx, dy) = (off.0 as f32, off.1 as f32);
    (dx * dx + dy * dy).sqrt()
}

fn relax(pixels: &mut [FieldPixel], width: usize, x: usize, y: usize, nx: i64, ny: i64) {
    let here = y * width + x;
    let there = ny as usize * width + nx as usize;
    let neighbor = pixels[there];
    if neighbor.seed_index < 0.0 {
        return;
    }

    let candidate_offset = (
        neighbor.offset.0 + (x as i64 - nx) as i16,
        neighbor.offset.1 + (y as i64 - ny) as i16,
    );
    let candidate_dist = offset_len(candidate_offset);
    if candidate_dist < pixels[here].distance {
        pixels[here] = FieldPixel {
            distance: candidate_dist,
            offset: candidate_offset,
            seed_index: neighbor.seed_index,
        };
    }
}

/// Run the forward and backward pass over `pixels`.
///
/// Seeds must be initialized to distance 0 / offset (0,0); everything else
/// to `FieldPixel::UNSEEDED`.
pub fn propagate(pixels: &mut [FieldPixel], width: usize, height: usize) {
    for y in 0..height {
        for x in 0..width {
            for &(dx, dy) in &FORWARD {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                    relax(pixels, width, x, y, nx, ny);
                }
            }
        }
    }
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            for &(dx, dy) in &BACKWARD {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                    relax(pixels, width, x, y, nx, ny);
                }
            }
        }
    }
}
