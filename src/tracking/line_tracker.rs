//! The per-frame edge tracker.
//!
//! Each frame runs: motion prediction, model projection, batched edge search,
//! hypothesis selection, then two robust optimization stages. Each stage cuts
//! outliers at mean + factor·sd of the current residual distances and runs a
//! damped LM solve with IRLS weights frozen at the stage-start pose. The
//! final residual drives the state machine and the pose smoothing gate.

use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::camera::{CameraPoseTrack, Pose, POSE_DIM};
use crate::config::{CameraMetrics, TrackerParams};
use crate::field::{EdgeSearch, FrameAnalysis};
use crate::model::{EdgeModel, ModelGeometrySource};
use crate::solver::{self, LeastSquaresTarget, LmConfig, Workspace};
use crate::tracking::result::{StageStats, TimingStats, TrackingResult};
use crate::tracking::state::TrackingState;
use crate::tracking::stats;

/// Fewer working samples than this fails the frame outright.
pub const MIN_WORKING_SAMPLES: usize = 24;

/// The outlier cut never tightens below one pixel, so a near-perfect frame
/// cannot reject its own samples.
const MIN_REJECTION_CUT: f64 = 1.0;

/// Pose refinement problem over the model's working samples.
///
/// Parameters are the leading 6 (or 7, with focal) pose scalars; residuals
/// are the signed candidate distances scaled by the square root of the
/// frozen IRLS weights.
struct PoseTarget<'a> {
    model: &'a EdgeModel,
    metrics: CameraMetrics,
    /// sqrt of the IRLS weight per residual row.
    sqrt_weights: &'a [f64],
    /// Focal parameter held fixed when not optimized.
    fixed_focal: f64,
    optimize_focal: bool,
}

impl PoseTarget<'_> {
    fn pose_from(&self, params: &DVector<f64>) -> Pose {
        let mut v = nalgebra::SVector::<f64, POSE_DIM>::zeros();
        for i in 0..params.len() {
            v[i] = params[i];
        }
        if !self.optimize_focal {
            v[6] = self.fixed_focal;
        }
        Pose::from_vector(&v)
    }
}

impl LeastSquaresTarget for PoseTarget<'_> {
    fn num_params(&self) -> usize {
        if self.optimize_focal {
            7
        } else {
            6
        }
    }

    fn num_residuals(&self) -> usize {
        self.model.working_sample_count()
    }

    fn residuals(&mut self, params: &DVector<f64>, out: &mut DVector<f64>) {
        let pose = self.pose_from(params);
        self.model.residuals_for_pose(&pose, &self.metrics, out);
        for (i, w) in self.sqrt_weights.iter().enumerate() {
            out[i] *= w;
        }
    }

    fn jacobian(&mut self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
        let pose = self.pose_from(params);
        self.model
            .update_jacobian(&pose, &self.metrics, self.optimize_focal, out);
        for (i, w) in self.sqrt_weights.iter().enumerate() {
            for j in 0..out.ncols() {
                out[(i, j)] *= w;
            }
        }
    }
}

/// Model-based edge tracker for one target object.
pub struct LineTracker {
    params: TrackerParams,
    model: EdgeModel,
    track: CameraPoseTrack,
    state: TrackingState,
    workspace: Workspace,
}

impl LineTracker {
    pub fn new(source: &ModelGeometrySource, metrics: CameraMetrics, params: TrackerParams) -> Self {
        let model = EdgeModel::from_source(source, params.sample_density, params.multi_hypothesis);
        Self {
            params,
            model,
            track: CameraPoseTrack::new(metrics),
            state: TrackingState::Disabled,
            workspace: Workspace::new(),
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn track(&self) -> &CameraPoseTrack {
        &self.track
    }

    pub fn model(&self) -> &EdgeModel {
        &self.model
    }

    /// Start verifying from the default pose.
    pub fn enable(&mut self) {
        self.track.reset_pose();
        self.model.assume_present();
        self.state = TrackingState::Initializing;
        info!("tracker enabled");
    }

    pub fn disable(&mut self) {
        self.state = TrackingState::Disabled;
    }

    /// Start verifying a recovered pose candidate.
    pub fn seed_candidate(&mut self, pose: Pose) {
        self.track.reset_to(pose);
        self.model.assume_present();
        self.state = TrackingState::Initializing;
        debug!(translation = ?pose.translation, "seeded pose candidate");
    }

    /// Run one frame. `frame` supplies the edge search and the visibility
    /// test of the external compute pipeline.
    pub fn track_frame<F>(&mut self, frame: &mut F) -> TrackingResult
    where
        F: EdgeSearch + FrameAnalysis,
    {
        if self.state == TrackingState::Failed {
            return TrackingResult::rejected(self.state, *self.track.smoothed_pose());
        }
        let frame_start = Instant::now();

        self.track.advance_frame(self.params.prediction_factor);
        let disabled = self.state == TrackingState::Disabled;
        if disabled {
            self.track.reset_pose();
        }
        let predicted = *self.track.extrapolated_pose();
        let metrics = *self.track.metrics();
        self.model.transform(&predicted, &metrics);

        let queries = self.model.sample_queries();
        if queries.len() < MIN_WORKING_SAMPLES && !disabled {
            debug!(queries = queries.len(), "too few samples in view");
            return self.fail_frame();
        }

        let search_start = Instant::now();
        let mut results =
            frame.search(&queries, self.params.search_range, self.params.color_tolerance);
        // Drop candidates of samples hidden behind nearer geometry.
        for (i, &(ei, slot)) in self.model.query_slots().iter().enumerate() {
            let s = &self.model.edges()[ei].samples[slot];
            if !frame.point_visible(&s.position, s.depth) {
                results[i].candidates.clear();
            }
        }
        let search_time = search_start.elapsed();

        // A disabled frame still advances the camera and issues the search;
        // only the optimization is skipped.
        if disabled {
            return TrackingResult::rejected(self.state, *self.track.smoothed_pose());
        }

        self.model.apply_search_results(&results);
        self.model.reset_inliers();
        self.model.calculate_hypothesis();
        if self.model.working_sample_count() < MIN_WORKING_SAMPLES {
            debug!(
                samples = self.model.working_sample_count(),
                "too few candidate hypotheses"
            );
            return self.fail_frame();
        }

        let optimize_start = Instant::now();

        // Stage 1: cut against the predicted-pose distances, then solve.
        let distances = self.model.distances();
        let cut_a = (stats::mean(&distances)
            + self.params.rejection_factor_a * stats::std_dev(&distances))
        .max(MIN_REJECTION_CUT);
        self.model.mark_outliers(cut_a);
        if self.model.working_sample_count() < MIN_WORKING_SAMPLES {
            return self.fail_frame();
        }
        let mut stage_a = StageStats {
            samples: self.model.working_sample_count(),
            cut: cut_a,
            ..StageStats::default()
        };
        let stage1_pose = self.run_stage(&predicted, &metrics, &mut stage_a);

        // Stage 2: cut against the stage-1 residuals, then solve again.
        let residuals1 = self.residuals_at(&stage1_pose, &metrics);
        let abs1: Vec<f64> = residuals1.iter().map(|r| r.abs()).collect();
        let cut_b = (stats::mean(&abs1) + self.params.rejection_factor_b * stats::std_dev(&abs1))
            .max(MIN_REJECTION_CUT);
        self.model.mark_outliers_for_pose(&stage1_pose, &metrics, cut_b);
        if self.model.working_sample_count() < MIN_WORKING_SAMPLES {
            return self.fail_frame();
        }
        let mut stage_b = StageStats {
            samples: self.model.working_sample_count(),
            cut: cut_b,
            ..StageStats::default()
        };
        let final_pose = self.run_stage(&stage1_pose, &metrics, &mut stage_b);

        let optimize_time = optimize_start.elapsed();

        // Unweighted RMS of the surviving samples drives the state machine.
        let final_residuals = self.residuals_at(&final_pose, &metrics);
        let error = rms(&final_residuals);
        let working = self.model.working_sample_count();

        let entered_tracking;
        match self.state {
            TrackingState::Initializing => {
                if error < self.params.initialization_threshold {
                    self.state = TrackingState::Tracking;
                    entered_tracking = true;
                    info!(error, working, "tracking initialized");
                } else {
                    self.state = TrackingState::Failed;
                    entered_tracking = false;
                    debug!(error, "pose candidate rejected");
                }
            }
            TrackingState::Tracking => {
                entered_tracking = false;
                if error > self.params.failure_threshold {
                    self.state = TrackingState::Failed;
                    info!(error, "tracking lost");
                }
            }
            _ => unreachable!(),
        }
        let valid = self.state == TrackingState::Tracking;

        self.track.set_current(final_pose);
        self.track.mark_result(valid);
        if valid {
            // Smooth less when the fit is poor.
            let gate = (1.0 - error / self.params.failure_threshold).clamp(0.0, 1.0);
            self.track.smooth_result(self.params.smoothing_factor * gate);
            if entered_tracking {
                self.model.reset_ref_colors();
            } else {
                self.model.adapt_ref_colors(self.params.color_adaptability);
            }
        }

        TrackingResult {
            state: self.state,
            valid,
            pose: *self.track.smoothed_pose(),
            working_samples: working,
            error,
            stages: [stage_a, stage_b],
            timing: TimingStats {
                search: search_time,
                optimize: optimize_time,
                total: frame_start.elapsed(),
            },
        }
    }

    /// One damped LM solve with IRLS weights frozen at `start`.
    fn run_stage(
        &mut self,
        start: &Pose,
        metrics: &CameraMetrics,
        stage: &mut StageStats,
    ) -> Pose {
        let residuals = self.residuals_at(start, metrics);
        let sqrt_weights: Vec<f64> = residuals
            .iter()
            .map(|r| {
                self.params
                    .estimator
                    .weight(*r, self.params.estimator_limit)
                    .sqrt()
            })
            .collect();

        let mut target = PoseTarget {
            model: &self.model,
            metrics: *metrics,
            sqrt_weights: &sqrt_weights,
            fixed_focal: start.focal,
            optimize_focal: self.params.optimize_focal,
        };
        let n = target.num_params();
        let mut params = DVector::from_iterator(n, start.as_vector().iter().take(n).copied());

        let config = LmConfig {
            max_iterations: self.params.max_iterations,
            ..LmConfig::default()
        };
        let report = solver::solve(&mut target, &mut params, &mut self.workspace, &config);
        stage.iterations = report.iterations;
        stage.cost_before = report.initial_cost;
        stage.cost_after = report.final_cost;

        target.pose_from(&params)
    }

    fn residuals_at(&self, pose: &Pose, metrics: &CameraMetrics) -> DVector<f64> {
        let mut out = DVector::zeros(self.model.working_sample_count());
        self.model.residuals_for_pose(pose, metrics, &mut out);
        out
    }

    fn fail_frame(&mut self) -> TrackingResult {
        self.state = TrackingState::Failed;
        self.track.mark_result(false);
        TrackingResult::rejected(self.state, *self.track.smoothed_pose())
    }
}

fn rms(v: &DVector<f64>) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.norm() / (v.len() as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    use crate::field::synthetic::SyntheticScene;

    fn box_source() -> ModelGeometrySource {
        ModelGeometrySource::Box {
            extents: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    fn test_params() -> TrackerParams {
        TrackerParams {
            color_tolerance: 200.0,
            smoothing_factor: 0.0,
            ..TrackerParams::default()
        }
    }

    /// Scene whose edges are the model's own visible edges projected at the
    /// ground-truth pose.
    fn scene_for_pose(truth: &Pose, metrics: &CameraMetrics) -> SyntheticScene {
        let mut model = EdgeModel::from_source(&box_source(), 0.1, true);
        model.transform(truth, metrics);

        let mut segments = Vec::new();
        for e in model.edges().iter().filter(|e| e.visible) {
            segments.push((e.proj_a, e.proj_b));
        }
        assert!(!segments.is_empty());

        // Silhouette polygon: axis-aligned hull of the projected corners
        // (good enough for the flat two-tone color model).
        let (mut min, mut max) = (Vector2::new(f64::MAX, f64::MAX), Vector2::new(f64::MIN, f64::MIN));
        for (a, b) in &segments {
            for p in [a, b] {
                min.x = min.x.min(p.x);
                min.y = min.y.min(p.y);
                max.x = max.x.max(p.x);
                max.y = max.y.max(p.y);
            }
        }
        let mut scene = SyntheticScene::new(metrics.width, metrics.height);
        scene.set_segments(segments);
        scene.set_silhouette(vec![
            Vector2::new(min.x, min.y),
            Vector2::new(max.x, min.y),
            Vector2::new(max.x, max.y),
            Vector2::new(min.x, max.y),
        ]);
        scene
    }

    #[test]
    fn test_disabled_tracker_ignores_frames() {
        let metrics = CameraMetrics::new(640, 480);
        let mut tracker = LineTracker::new(&box_source(), metrics, test_params());
        let mut scene = scene_for_pose(&Pose::default(), &metrics);

        let result = tracker.track_frame(&mut scene);
        assert_eq!(result.state, TrackingState::Disabled);
        assert!(!result.valid);
    }

    #[test]
    fn test_disabled_frame_searches_without_failing() {
        let metrics = CameraMetrics::new(640, 480);
        let mut tracker = LineTracker::new(&box_source(), metrics, test_params());

        // A near-empty scene: the search finds nothing useful, but a
        // disabled tracker must still stay disabled rather than fail.
        let mut scene = SyntheticScene::new(metrics.width, metrics.height);
        scene.set_segments(vec![(Vector2::new(2.0, 2.0), Vector2::new(6.0, 2.0))]);
        for _ in 0..3 {
            let result = tracker.track_frame(&mut scene);
            assert_eq!(result.state, TrackingState::Disabled);
            assert!(!result.valid);
        }
        assert_eq!(tracker.state(), TrackingState::Disabled);
    }

    #[test]
    fn test_converges_from_perturbed_seed() {
        let metrics = CameraMetrics::new(640, 480);
        let truth = Pose::default();
        let mut scene = scene_for_pose(&truth, &metrics);

        let mut tracker = LineTracker::new(&box_source(), metrics, test_params());
        let seed = Pose::new(
            truth.translation + Vector3::new(0.02, -0.015, 0.0),
            Vector3::new(0.0, 0.0, 0.005),
            truth.focal,
        );
        tracker.seed_candidate(seed);

        let result = tracker.track_frame(&mut scene);
        assert_eq!(result.state, TrackingState::Tracking, "error = {}", result.error);
        assert!(result.valid);
        assert!(result.error < 1.5, "error = {}", result.error);
        assert_relative_eq!(
            result.pose.translation.x,
            truth.translation.x,
            epsilon = 0.01
        );
        assert_relative_eq!(
            result.pose.translation.y,
            truth.translation.y,
            epsilon = 0.01
        );
        assert!(result.working_samples >= MIN_WORKING_SAMPLES);
    }

    #[test]
    fn test_bad_candidate_moves_to_failed() {
        let metrics = CameraMetrics::new(640, 480);
        let mut scene = scene_for_pose(&Pose::default(), &metrics);

        let mut tracker = LineTracker::new(&box_source(), metrics, test_params());
        // Far off to one side: the model projects mostly out of view.
        tracker.seed_candidate(Pose::new(
            Vector3::new(4.0, 0.0, 5.0),
            Vector3::zeros(),
            8.0,
        ));

        let result = tracker.track_frame(&mut scene);
        assert_eq!(result.state, TrackingState::Failed);
        assert!(!result.valid);

        // Failed trackers stay failed until reseeded.
        let again = tracker.track_frame(&mut scene);
        assert_eq!(again.state, TrackingState::Failed);
    }

    #[test]
    fn test_tracks_across_frames_with_motion() {
        let metrics = CameraMetrics::new(640, 480);
        let mut tracker = LineTracker::new(&box_source(), metrics, test_params());
        tracker.seed_candidate(Pose::default());

        // The object slides slowly in x over several frames.
        for i in 0..5 {
            let truth = Pose::new(
                Vector3::new(0.01 * i as f64, 0.0, 5.0),
                Vector3::zeros(),
                8.0,
            );
            let mut scene = scene_for_pose(&truth, &metrics);
            let result = tracker.track_frame(&mut scene);
            assert!(result.valid, "lost at frame {i}: error = {}", result.error);
        }
        assert!(tracker.state().is_tracking());
    }

    #[test]
    fn test_seed_candidate_enters_initializing() {
        let metrics = CameraMetrics::new(640, 480);
        let mut tracker = LineTracker::new(&box_source(), metrics, test_params());
        assert_eq!(tracker.state(), TrackingState::Disabled);
        tracker.seed_candidate(Pose::default());
        assert_eq!(tracker.state(), TrackingState::Initializing);
        tracker.disable();
        assert_eq!(tracker.state(), TrackingState::Disabled);
    }
}
