//! Ferns classifier primitives: the fixed pixel-pair test table and the
//! normalized distance-map patch the tests are evaluated on.

use nalgebra::{Matrix3, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detection::apply_homography;
use crate::detection::contour::Contour;
use crate::field::DistanceField;

/// One pixel-pair comparison inside the patch.
#[derive(Debug, Clone, Copy)]
struct PairTest {
    x0: u16,
    y0: u16,
    x1: u16,
    y1: u16,
}

/// The fixed `num_ferns × num_bits` test table, drawn once from a seed.
///
/// Only the seed and the dimensions are serialized; the table is regenerated
/// deterministically on load.
#[derive(Debug, Clone)]
pub struct FernTests {
    num_ferns: usize,
    num_bits: usize,
    patch_size: usize,
    seed: u64,
    tests: Vec<PairTest>,
}

impl FernTests {
    pub fn generate(num_ferns: usize, num_bits: usize, patch_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let tests = (0..num_ferns * num_bits)
            .map(|_| PairTest {
                x0: rng.gen_range(0..patch_size) as u16,
                y0: rng.gen_range(0..patch_size) as u16,
                x1: rng.gen_range(0..patch_size) as u16,
                y1: rng.gen_range(0..patch_size) as u16,
            })
            .collect();
        Self {
            num_ferns,
            num_bits,
            patch_size,
            seed,
            tests,
        }
    }

    pub fn num_ferns(&self) -> usize {
        self.num_ferns
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Per-fern bit codes over a patch. A bit is set when the second pixel
    /// exceeds the first and the first lies inside the shape mask.
    pub fn descriptor(&self, patch: &ContourPatch) -> Vec<u32> {
        let mut codes = Vec::with_capacity(self.num_ferns);
        for f in 0..self.num_ferns {
            let mut code = 0u32;
            for b in 0..self.num_bits {
                let t = &self.tests[f * self.num_bits + b];
                let p0 = patch.get(t.x0 as usize, t.y0 as usize);
                let p1 = patch.get(t.x1 as usize, t.y1 as usize);
                if p1 > p0 && p0 >= 0.0 {
                    code |= 1 << b;
                }
            }
            codes.push(code);
        }
        codes
    }
}

/// Distance-map patch sampled over a contour's normalized frame.
///
/// Pixels outside the unit disk (the shape mask) or on poisoned field
/// pixels are marked −1.
#[derive(Debug, Clone)]
pub struct ContourPatch {
    size: usize,
    values: Vec<f32>,
}

impl ContourPatch {
    /// Warp the frame's distance field into the contour's normalized frame.
    pub fn extract(field: &DistanceField, contour: &Contour, size: usize) -> Self {
        let inverse = contour
            .normalization
            .try_inverse()
            .unwrap_or_else(Matrix3::identity);
        let half = 0.5 * (size - 1) as f64;

        let mut values = vec![-1.0f32; size * size];
        for y in 0..size {
            for x in 0..size {
                let q = Vector2::new(x as f64 / half - 1.0, y as f64 / half - 1.0);
                if q.norm_squared() > 1.0 {
                    continue;
                }
                let p = apply_homography(&inverse, &q);
                let d = field.distance_at(&p);
                values[y * size + x] = if d < 0.0 { -1.0 } else { d as f32 };
            }
        }
        Self { size, values }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.size + x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Workspace;

    #[test]
    fn test_same_seed_same_tests() {
        let a = FernTests::generate(8, 10, 64, 42);
        let b = FernTests::generate(8, 10, 64, 42);
        for (ta, tb) in a.tests.iter().zip(&b.tests) {
            assert_eq!((ta.x0, ta.y0, ta.x1, ta.y1), (tb.x0, tb.y0, tb.x1, tb.y1));
        }
    }

    #[test]
    fn test_different_seed_different_tests() {
        let a = FernTests::generate(8, 10, 64, 1);
        let b = FernTests::generate(8, 10, 64, 2);
        let same = a
            .tests
            .iter()
            .zip(&b.tests)
            .filter(|(ta, tb)| (ta.x0, ta.y0) == (tb.x0, tb.y0))
            .count();
        assert!(same < a.tests.len() / 2);
    }

    #[test]
    fn test_codes_fit_bit_width() {
        let tests = FernTests::generate(4, 6, 32, 7);
        let patch = ContourPatch {
            size: 32,
            values: (0..32 * 32).map(|i| (i % 17) as f32).collect(),
        };
        for code in tests.descriptor(&patch) {
            assert!(code < 1 << 6);
        }
    }

    #[test]
    fn test_patch_masks_outside_unit_disk() {
        // Circle contour in a small synthetic field.
        let (w, h) = (128usize, 128usize);
        let mut mask = vec![false; w * h];
        for i in 0..360 {
            let a = i as f64 / 360.0 * std::f64::consts::TAU;
            let x = (64.0 + 25.0 * a.cos()).round() as usize;
            let y = (64.0 + 25.0 * a.sin()).round() as usize;
            mask[y * w + x] = true;
        }
        let field = DistanceField::from_edge_mask(&mask, w, h);

        let points = (0..360)
            .map(|i| {
                let a = i as f64 / 360.0 * std::f64::consts::TAU;
                Vector2::new(64.0 + 25.0 * a.cos(), 64.0 + 25.0 * a.sin())
            })
            .collect();
        let mut contour = Contour::new(points, true);
        let mut ws = Workspace::new();
        contour.normalize(&mut ws);

        let patch = ContourPatch::extract(&field, &contour, 32);
        // Corners are outside the unit disk.
        assert_eq!(patch.get(0, 0), -1.0);
        assert_eq!(patch.get(31, 31), -1.0);
        // The center is inside and carries a real distance.
        assert!(patch.get(16, 16) > 0.0);
    }
}
