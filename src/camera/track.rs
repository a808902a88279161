//! Camera pose track: calibration plus a short ring-buffer history of solved
//! and smoothed poses.
//!
//! The track owns the per-frame working poses (start, extrapolated, current,
//! smoothed) and produces motion-predicted poses by linear extrapolation of
//! the last two valid history entries.

use nalgebra::{DVector, Matrix4};

use crate::camera::pose::Pose;
use crate::config::CameraMetrics;

/// Ring-buffer depth of the pose history.
pub const HISTORY_LEN: usize = 8;

/// Number of historical poses averaged by `smooth_result`.
const SMOOTH_WINDOW: usize = 5;

/// Calibration + pose history for one tracking session.
///
/// Created once per session; mutated every `advance_frame` / `update_pose` /
/// `smooth_result` call.
pub struct CameraPoseTrack {
    metrics: CameraMetrics,

    /// Solved poses, most recent first.
    solved: [Pose; HISTORY_LEN],
    /// Smoothed poses, most recent first.
    smoothed: [Pose; HISTORY_LEN],
    /// Validity of each history slot.
    valid: [bool; HISTORY_LEN],

    /// Working poses for the current frame.
    start: Pose,
    extrapolated: Pose,
    current: Pose,
    smoothed_current: Pose,

    /// Whether the current frame produced a usable pose.
    current_valid: bool,
}

impl CameraPoseTrack {
    pub fn new(metrics: CameraMetrics) -> Self {
        let p = Pose::default();
        Self {
            metrics,
            solved: [p; HISTORY_LEN],
            smoothed: [p; HISTORY_LEN],
            valid: [false; HISTORY_LEN],
            start: p,
            extrapolated: p,
            current: p,
            smoothed_current: p,
            current_valid: false,
        }
    }

    pub fn metrics(&self) -> &CameraMetrics {
        &self.metrics
    }

    /// Re-seed the history with the default pose.
    pub fn reset_pose(&mut self) {
        self.reset_to(Pose::default());
    }

    /// Re-seed the history with the given pose and clear all valid flags.
    pub fn reset_to(&mut self, pose: Pose) {
        self.solved = [pose; HISTORY_LEN];
        self.smoothed = [pose; HISTORY_LEN];
        self.valid = [false; HISTORY_LEN];
        self.start = pose;
        self.extrapolated = pose;
        self.current = pose;
        self.smoothed_current = pose;
        self.current_valid = false;
    }

    /// Rotate the ring and derive the predicted pose for the new frame.
    ///
    /// With at least two valid priors the start pose is linearly extrapolated:
    /// `extra = start + prediction_factor · 0.5 · (p[t-1] − p[t-2])`.
    pub fn advance_frame(&mut self, prediction_factor: f64) {
        for i in (1..HISTORY_LEN).rev() {
            self.solved[i] = self.solved[i - 1];
            self.smoothed[i] = self.smoothed[i - 1];
            self.valid[i] = self.valid[i - 1];
        }
        self.solved[0] = self.current;
        self.smoothed[0] = self.smoothed_current;
        self.valid[0] = self.current_valid;

        self.start = self.solved[0];
        self.extrapolated = if self.valid[0] && self.valid[1] {
            let step = self.solved[0].as_vector() - self.solved[1].as_vector();
            Pose::from_vector(&(self.start.as_vector() + prediction_factor * 0.5 * step))
        } else {
            self.start
        };

        self.current = self.extrapolated;
        self.smoothed_current = self.extrapolated;
        self.current_valid = false;
    }

    /// Write the optimizer's delta into the current-frame slot.
    pub fn update_pose(&mut self, delta: &DVector<f64>) {
        self.current = self.current.apply_delta(delta);
    }

    /// Overwrite the current pose (detector candidate seeding).
    pub fn set_current(&mut self, pose: Pose) {
        self.current = pose;
        self.smoothed_current = pose;
    }

    /// Mark the current frame's pose as usable (or not) for prediction.
    pub fn mark_result(&mut self, valid: bool) {
        self.current_valid = valid;
    }

    /// Blend the mean of the last 5 valid historical smoothed poses with the
    /// un-smoothed current estimate, weighted by `factor ∈ [0,1]`.
    ///
    /// Falls back to no smoothing until two valid history entries exist.
    pub fn smooth_result(&mut self, factor: f64) {
        let mut window = Vec::with_capacity(SMOOTH_WINDOW);
        for i in 0..SMOOTH_WINDOW {
            if self.valid[i] {
                window.push(self.smoothed[i]);
            }
        }
        if window.len() < 2 {
            self.smoothed_current = self.current;
            return;
        }
        let mean = Pose::mean_of(&window);
        self.smoothed_current = self.current.lerp(&mean, factor.clamp(0.0, 1.0));
    }

    pub fn start_pose(&self) -> &Pose {
        &self.start
    }

    pub fn extrapolated_pose(&self) -> &Pose {
        &self.extrapolated
    }

    pub fn current_pose(&self) -> &Pose {
        &self.current
    }

    pub fn smoothed_pose(&self) -> &Pose {
        &self.smoothed_current
    }

    pub fn history_valid(&self, index: usize) -> bool {
        self.valid[index]
    }

    pub fn history_pose(&self, index: usize) -> &Pose {
        &self.solved[index]
    }

    /// Single pose scalar of the current pose, 0..=6 (focal unscaled).
    pub fn pose_param(&self, index: usize) -> f64 {
        self.current.param(index)
    }

    pub fn start_view(&self) -> Matrix4<f64> {
        self.start.view_matrix()
    }

    pub fn extrapolated_view(&self) -> Matrix4<f64> {
        self.extrapolated.view_matrix()
    }

    pub fn current_view(&self) -> Matrix4<f64> {
        self.current.view_matrix()
    }

    pub fn smoothed_view(&self) -> Matrix4<f64> {
        self.smoothed_current.view_matrix()
    }

    pub fn extrapolated_view_projection(&self) -> Matrix4<f64> {
        self.extrapolated.view_projection(&self.metrics)
    }

    pub fn current_view_projection(&self) -> Matrix4<f64> {
        self.current.view_projection(&self.metrics)
    }

    pub fn smoothed_view_projection(&self) -> Matrix4<f64> {
        self.smoothed_current.view_projection(&self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn track() -> CameraPoseTrack {
        CameraPoseTrack::new(CameraMetrics::new(640, 480))
    }

    #[test]
    fn test_reset_after_advance_clears_history() {
        let mut t = track();
        t.mark_result(true);
        t.advance_frame(1.0);
        assert!(t.history_valid(0));

        t.reset_pose();
        for i in 0..HISTORY_LEN {
            assert!(!t.history_valid(i));
        }
    }

    #[test]
    fn test_smoothing_without_priors_is_identity() {
        let mut t = track();
        let delta = DVector::from_vec(vec![0.3, 0.0, 0.0, 0.0, 0.0, 0.0]);
        t.update_pose(&delta);
        t.smooth_result(0.9);
        assert_eq!(t.smoothed_pose(), t.current_pose());
    }

    #[test]
    fn test_extrapolation_uses_half_step() {
        let mut t = track();
        // Frame 1: move +0.2 in x.
        t.update_pose(&DVector::from_vec(vec![0.2, 0.0, 0.0, 0.0, 0.0, 0.0]));
        t.mark_result(true);
        t.advance_frame(1.0);
        // Frame 2: move another +0.2.
        t.update_pose(&DVector::from_vec(vec![0.2, 0.0, 0.0, 0.0, 0.0, 0.0]));
        t.mark_result(true);
        t.advance_frame(1.0);

        // Two valid priors with delta 0.2 => predicted +0.1 beyond the start.
        let start_x = t.start_pose().translation.x;
        let extra_x = t.extrapolated_pose().translation.x;
        assert_relative_eq!(extra_x - start_x, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_no_extrapolation_with_single_prior() {
        let mut t = track();
        t.update_pose(&DVector::from_vec(vec![0.2, 0.0, 0.0, 0.0, 0.0, 0.0]));
        t.mark_result(true);
        t.advance_frame(1.0);
        assert_eq!(t.extrapolated_pose(), t.start_pose());
    }

    #[test]
    fn test_smoothing_blends_history_mean() {
        let mut t = track();
        for _ in 0..3 {
            t.mark_result(true);
            t.smooth_result(0.0);
            t.advance_frame(0.0);
        }
        // History poses are all default; push current away and smooth fully.
        t.set_current(Pose::new(
            Vector3::new(1.0, 0.0, 5.0),
            Vector3::zeros(),
            8.0,
        ));
        t.smooth_result(1.0);
        assert_relative_eq!(t.smoothed_pose().translation.x, 0.0, epsilon = 1e-12);
        t.smooth_result(0.5);
        assert_relative_eq!(t.smoothed_pose().translation.x, 0.5, epsilon = 1e-12);
    }
}
