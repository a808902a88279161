//! Contour-based pose recovery: contour extraction, template matching, the
//! ferns classifier, the learned class database and the detector pipeline.

pub mod class;
pub mod contour;
pub mod database;
pub mod detector;
pub mod ferns;
pub mod finder;
pub mod template;
pub mod worker;

use nalgebra::{Matrix3, Vector2};

/// Hard upper bound on the fern ensemble size (serialization format limit).
pub const MAX_FERNS: usize = 64;

/// Contour point capacity; a walk reaching this length is "saturated" and
/// the fragment is rejected.
pub const MAX_CONTOUR_LEN: usize = 4096;

/// Contours shorter than this are rejected by `process`.
pub const MIN_CONTOUR_LEN: usize = 75;

/// Maximum contour fragments traced per detection pass.
pub const MAX_CONTOUR_FRAGMENTS: usize = 64;

/// Maximum contours processed, and pose candidates reported, per detection
/// pass.
pub const MAX_CONTOUR_CANDIDATES: usize = 16;

pub use class::{ContourClass, Reconstruction};
pub use contour::{Contour, Ellipse};
pub use database::{ClassCandidate, ContourDatabase, InsertOutcome};
pub use detector::{DetectedPoseCandidate, PoseDetector};
pub use ferns::{ContourPatch, FernTests};
pub use finder::ContourFinder;
pub use template::{ContourTemplate, HomographyFit};
pub use worker::DetectorThread;

/// Apply a 3×3 projective transform to a 2-D point (homogeneous divide).
#[inline]
pub(crate) fn apply_homography(m: &Matrix3<f64>, p: &Vector2<f64>) -> Vector2<f64> {
    let w = m[(2, 0)] * p.x + m[(2, 1)] * p.y + m[(2, 2)];
    Vector2::new(
        (m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 2)]) / w,
        (m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 2)]) / w,
    )
}
