//! Distance-transform field consumed from the external edge-detect step, and
//! the traits behind which the GPU collaborators (edge detection + distance
//! transform, depth readback, batched edge search) are hidden.
//!
//! The host algorithms treat these as synchronous, blocking calls; a CPU
//! reference implementation lives in [`synthetic`] for tests and the demo.

pub mod chamfer;
pub mod synthetic;

use nalgebra::Vector2;

/// One pixel of the distance-transform field.
///
/// `offset` is this pixel's position relative to the edge pixel that seeded
/// it; `seed_index` is the linear index of that seed. Border pixels are
/// pre-seeded to distance = −1 by the producer.
#[derive(Debug, Clone, Copy)]
pub struct FieldPixel {
    pub distance: f32,
    pub offset: (i16, i16),
    pub seed_index: f32,
}

impl FieldPixel {
    pub const UNSEEDED: FieldPixel = FieldPixel {
        distance: f32::MAX,
        offset: (0, 0),
        seed_index: -1.0,
    };
}

/// Dense distance-transform field over one frame.
#[derive(Debug, Clone)]
pub struct DistanceField {
    width: usize,
    height: usize,
    pixels: Vec<FieldPixel>,
}

impl DistanceField {
    /// Build a field from an edge mask via chamfer propagation.
    ///
    /// Edge pixels get distance 0 and seed themselves; border pixels are
    /// pre-seeded to −1, matching the external producer's convention.
    pub fn from_edge_mask(mask: &[bool], width: usize, height: usize) -> Self {
        debug_assert_eq!(mask.len(), width * height);
        let mut pixels = vec![FieldPixel::UNSEEDED; width * height];
        for (i, &is_edge) in mask.iter().enumerate() {
            if is_edge {
                pixels[i] = FieldPixel {
                    distance: 0.0,
                    offset: (0, 0),
                    seed_index: i as f32,
                };
            }
        }

        chamfer::propagate(&mut pixels, width, height);

        let mut field = Self {
            width,
            height,
            pixels,
        };
        field.seed_border();
        field
    }

    fn seed_border(&mut self) {
        let (w, h) = (self.width, self.height);
        for x in 0..w {
            self.pixels[x].distance = -1.0;
            self.pixels[(h - 1) * w + x].distance = -1.0;
        }
        for y in 0..h {
            self.pixels[y * w].distance = -1.0;
            self.pixels[y * w + w - 1].distance = -1.0;
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &FieldPixel {
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn distance(&self, x: usize, y: usize) -> f32 {
        self.get(x, y).distance
    }

    /// Bilinear distance lookup at a sub-pixel position, clamped to the
    /// field. Negative (border-seeded) pixels poison the interpolation and
    /// are reported as-is.
    pub fn distance_at(&self, p: &Vector2<f64>) -> f64 {
        let x = p.x.clamp(0.0, (self.width - 1) as f64);
        let y = p.y.clamp(0.0, (self.height - 1) as f64);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let d00 = self.distance(x0, y0) as f64;
        let d10 = self.distance(x1, y0) as f64;
        let d01 = self.distance(x0, y1) as f64;
        let d11 = self.distance(x1, y1) as f64;
        if d00 < 0.0 || d10 < 0.0 || d01 < 0.0 || d11 < 0.0 {
            return d00.min(d10).min(d01).min(d11);
        }

        let top = d00 * (1.0 - fx) + d10 * fx;
        let bottom = d01 * (1.0 - fx) + d11 * fx;
        top * (1.0 - fy) + bottom * fy
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }
}

/// Per-sample query sent to the batched edge search.
#[derive(Debug, Clone)]
pub struct SampleQuery {
    pub position: Vector2<f64>,
    pub normal: Vector2<f64>,
    pub ref_colors: [f64; 2],
    pub was_present: bool,
}

/// One candidate found by the edge search.
#[derive(Debug, Clone)]
pub struct CandidateObservation {
    pub position: Vector2<f64>,
    /// Edge-response strength at the candidate.
    pub response: f64,
    /// Similarity of the local colors to the sample's reference colors.
    pub color_match: f64,
    /// Colors sampled on either side of the candidate edge.
    pub colors: [f64; 2],
}

/// Search result for one sample.
#[derive(Debug, Clone, Default)]
pub struct SampleSearchResult {
    pub candidates: Vec<CandidateObservation>,
    /// Colors sampled at the predicted sample position (for the adaptive
    /// reference-color model).
    pub colors: [f64; 2],
}

/// Batched edge search along sample normals (external compute collaborator).
pub trait EdgeSearch {
    fn search(
        &mut self,
        queries: &[SampleQuery],
        range: f64,
        color_tolerance: f64,
    ) -> Vec<SampleSearchResult>;
}

/// Per-frame external products: the distance-transform field of the frame's
/// edge image and the rasterized depth for visibility tests.
pub trait FrameAnalysis {
    fn distance_field(&mut self) -> &DistanceField;

    /// Hidden-line visibility test against the rasterized depth buffer.
    fn point_visible(&self, position: &Vector2<f64>, depth: f64) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_field() -> DistanceField {
        // Vertical edge at x = 8 in a 16x16 field.
        let (w, h) = (16, 16);
        let mut mask = vec![false; w * h];
        for y in 0..h {
            mask[y * w + 8] = true;
        }
        DistanceField::from_edge_mask(&mask, w, h)
    }

    #[test]
    fn test_edge_pixels_have_zero_distance() {
        let f = small_field();
        assert_eq!(f.distance(8, 7), 0.0);
        assert_eq!(f.get(8, 7).offset, (0, 0));
    }

    #[test]
    fn test_distance_grows_away_from_edge() {
        let f = small_field();
        assert!((f.distance(10, 7) - 2.0).abs() < 0.5);
        assert!((f.distance(12, 7) - 4.0).abs() < 0.75);
    }

    #[test]
    fn test_offsets_point_to_seed() {
        let f = small_field();
        let p = f.get(11, 7);
        assert_eq!(p.offset, (3, 0));
        assert_eq!(p.seed_index, (7 * 16 + 8) as f32);
    }

    #[test]
    fn test_border_is_negative() {
        let f = small_field();
        assert_eq!(f.distance(0, 5), -1.0);
        assert_eq!(f.distance(5, 0), -1.0);
        assert_eq!(f.distance(15, 5), -1.0);
        assert_eq!(f.distance(5, 15), -1.0);
    }
}
