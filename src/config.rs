//! Runtime parameters for tracking, training and detection.
//!
//! Defaults follow the values the tracker ships with; everything is plain
//! data so a host application can persist/edit them.

use serde::{Deserialize, Serialize};

use crate::error::{EdgetrackError, Result};
use crate::solver::RobustKind;

/// Pinhole camera metrics shared by tracker and detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraMetrics {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Principal point (defaults to the image center).
    pub cx: f64,
    pub cy: f64,
}

impl CameraMetrics {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cx: width as f64 * 0.5,
            cy: height as f64 * 0.5,
        }
    }
}

/// Parameters of the per-frame edge tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerParams {
    /// Robust loss used by both optimization stages.
    pub estimator: RobustKind,
    /// Limit parameter of the robust loss (pixels).
    pub estimator_limit: f64,
    /// Motion-prediction gain fed to `CameraPoseTrack::advance_frame`.
    pub prediction_factor: f64,
    /// Stage-1 outlier cut: mean + a·sd of predicted-pose distances.
    pub rejection_factor_a: f64,
    /// Stage-2 outlier cut: mean + b·sd of stage-1 residuals.
    pub rejection_factor_b: f64,
    /// Entering `Tracking` requires error below this (pixels).
    pub initialization_threshold: f64,
    /// Leaving `Tracking` requires error above this (pixels).
    pub failure_threshold: f64,
    /// Base pose-smoothing factor, gated by the final cost.
    pub smoothing_factor: f64,
    /// Per-frame blend weight of fresh sample colors into the reference model.
    pub color_adaptability: f64,
    /// Color distance treated as a perfect match by the edge search.
    pub color_tolerance: f64,
    /// Half-length of the normal search scan (pixels).
    pub search_range: f64,
    /// Samples per projected pixel of edge length.
    pub sample_density: f64,
    /// Use the multi-hypothesis candidate selection rule.
    pub multi_hypothesis: bool,
    /// Also optimize the focal length (7th pose parameter).
    pub optimize_focal: bool,
    /// Maximum LM iterations per stage.
    pub max_iterations: usize,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            estimator: RobustKind::Tukey,
            estimator_limit: 8.0,
            prediction_factor: 1.0,
            rejection_factor_a: 2.5,
            rejection_factor_b: 2.0,
            initialization_threshold: 2.5,
            failure_threshold: 6.0,
            smoothing_factor: 0.5,
            color_adaptability: 0.2,
            color_tolerance: 24.0,
            search_range: 16.0,
            sample_density: 0.1,
            multi_hypothesis: true,
            optimize_focal: false,
            max_iterations: 12,
        }
    }
}

/// Training parameters of the contour classifier database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Number of ferns in the ensemble.
    pub num_ferns: usize,
    /// Bits (pixel-pair tests) per fern.
    pub num_bits: usize,
    /// Side length of the normalized patch / template maps.
    pub patch_size: usize,
    /// Seed for drawing the fern test positions.
    pub fern_seed: u64,
    /// Area-scaled homography fit MSE below which a contour matches a class.
    pub warp_error_threshold: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_ferns: 20,
            num_bits: 12,
            patch_size: 64,
            fern_seed: 0x5eed_c0de,
            warp_error_threshold: 0.02,
        }
    }
}

impl TrainingParams {
    /// Enforce the classifier invariants (`num_bits ≤ 32`, `num_ferns < MAX_FERNS`).
    pub fn validate(&self) -> Result<()> {
        if self.num_bits > 32 {
            return Err(EdgetrackError::InvalidConfig(format!(
                "num_bits must be <= 32, got {}",
                self.num_bits
            )));
        }
        if self.num_ferns >= crate::detection::MAX_FERNS {
            return Err(EdgetrackError::InvalidConfig(format!(
                "num_ferns must be < {}, got {}",
                crate::detection::MAX_FERNS,
                self.num_ferns
            )));
        }
        if self.patch_size < 8 {
            return Err(EdgetrackError::InvalidConfig(format!(
                "patch_size must be >= 8, got {}",
                self.patch_size
            )));
        }
        Ok(())
    }
}

/// Parameters of the recovery detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Contour extraction algorithm.
    pub finder: FinderAlgorithm,
    /// Iso-distance level walked by the level-curve finder.
    pub level: f32,
    /// Force all detections to this contour type, if present.
    pub fixed_type: Option<usize>,
    /// Reject homography fits with |det| below this.
    pub min_homography_det: f64,
    /// Maximum candidates reported per detection pass.
    pub max_candidates: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            finder: FinderAlgorithm::Direct,
            level: 2.0,
            fixed_type: None,
            min_homography_det: 1e-3,
            max_candidates: 8,
        }
    }
}

/// Contour extraction algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinderAlgorithm {
    /// 8-connected walk along zero-distance pixels.
    Direct,
    /// Iso-distance band walk propagating ids to seed pixels.
    LevelCurve,
}
