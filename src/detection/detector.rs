//! The recovery detector: contour extraction, classification, homography
//! fitting, pose reconstruction and candidate ranking for one frame.

use std::sync::Arc;

use nalgebra::Vector2;
use tracing::debug;

use crate::camera::Pose;
use crate::config::DetectorParams;
use crate::detection::database::ContourDatabase;
use crate::detection::finder::ContourFinder;
use crate::detection::MAX_CONTOUR_CANDIDATES;
use crate::field::DistanceField;
use crate::solver::Workspace;

/// One ranked pose candidate from a detection pass.
#[derive(Debug, Clone)]
pub struct DetectedPoseCandidate {
    pub pose: Pose,
    pub contour_type: usize,
    pub class_index: usize,
    /// Descriptor probability under the matched class.
    pub probability: f64,
    /// Learned class reliability (mean pose-difference; lower = better).
    pub ambiguity: f64,
    /// Learned class fit quality (mean scaled MSE; lower = better).
    pub accuracy: f64,
    /// Decomposition angle deviation from 90° (radians).
    pub angle_deviation: f64,
    /// Area-scaled homography MSE of this detection.
    pub fit_error: f64,
    /// Barycenter of the source contour (diagnostics).
    pub contour_center: Vector2<f64>,
}

/// Orchestrates one full detection pass over a distance field.
pub struct PoseDetector {
    database: Arc<ContourDatabase>,
    params: DetectorParams,
    finder: ContourFinder,
    workspace: Workspace,
    /// Focal parameter used for reconstruction intrinsics.
    focal: f64,
}

impl PoseDetector {
    pub fn new(database: Arc<ContourDatabase>, params: DetectorParams) -> Self {
        let finder = ContourFinder::new(params.finder, params.level);
        Self {
            database,
            params,
            finder,
            workspace: Workspace::new(),
            focal: Pose::default().focal,
        }
    }

    pub fn set_focal(&mut self, focal: f64) {
        self.focal = focal;
    }

    /// Run one detection pass, returning ranked pose candidates.
    pub fn detect(&mut self, field: &DistanceField) -> Vec<DetectedPoseCandidate> {
        if !self.database.is_valid() {
            return Vec::new();
        }
        let contours = self.finder.process(field);
        let area = {
            let s = self.database.training().patch_size;
            (s * s) as f64
        };
        let reference = Pose::new(nalgebra::Vector3::zeros(), nalgebra::Vector3::zeros(), self.focal);
        let intrinsics = reference.intrinsics(self.database.metrics());

        let mut candidates = Vec::new();
        for contour in &contours {
            let matches = match self.database.best_class_candidates(field, contour) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let normalized = contour.normalized_points();

            for m in matches {
                let class = self.database.class(m.contour_type, m.class);
                let fit = class.template().match_contour(&normalized, &mut self.workspace);
                if fit.det.abs() < self.params.min_homography_det {
                    continue;
                }
                let scaled = fit.mse / area;
                if scaled > self.database.training().warp_error_threshold {
                    continue;
                }
                let recon = match class.reconstruct(
                    &fit.homography,
                    &contour.normalization,
                    &intrinsics,
                ) {
                    Some(r) => r,
                    None => continue,
                };
                let pose = Pose::from_rotation_translation(
                    &recon.rotation,
                    &recon.translation,
                    self.focal,
                );
                candidates.push(DetectedPoseCandidate {
                    pose,
                    contour_type: m.contour_type,
                    class_index: m.class,
                    probability: m.probability,
                    ambiguity: class.pose_ambiguity(),
                    accuracy: class.fitting_accuracy(),
                    angle_deviation: recon.angle_deviation,
                    fit_error: scaled,
                    contour_center: contour.barycenter,
                });
            }
        }
        debug!(
            contours = contours.len(),
            candidates = candidates.len(),
            "detection pass"
        );
        self.rank(candidates)
    }

    /// Aggregation policy: a single matched type is used directly; a fixed
    /// type override wins when present; otherwise candidates are ranked by
    /// learned pose-ambiguity.
    fn rank(&self, mut candidates: Vec<DetectedPoseCandidate>) -> Vec<DetectedPoseCandidate> {
        let mut types: Vec<usize> = candidates.iter().map(|c| c.contour_type).collect();
        types.sort_unstable();
        types.dedup();

        if types.len() > 1 {
            if let Some(fixed) = self.params.fixed_type {
                if types.contains(&fixed) {
                    candidates.retain(|c| c.contour_type == fixed);
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.ambiguity
                .total_cmp(&b.ambiguity)
                .then(b.probability.total_cmp(&a.probability))
        });
        candidates.truncate(self.params.max_candidates.min(MAX_CONTOUR_CANDIDATES));
        candidates
    }
}
