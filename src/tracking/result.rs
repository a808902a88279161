//! Per-frame tracking report.

use std::time::Duration;

use crate::camera::Pose;
use crate::tracking::state::TrackingState;

/// Statistics of one optimization stage.
#[derive(Debug, Clone, Default)]
pub struct StageStats {
    /// Working samples entering the stage.
    pub samples: usize,
    /// Outlier cut applied before the stage (pixels).
    pub cut: f64,
    /// LM iterations spent.
    pub iterations: usize,
    /// RMS residual before / after the stage (pixels).
    pub cost_before: f64,
    pub cost_after: f64,
}

/// Wall-clock timings of one tracked frame.
#[derive(Debug, Clone, Default)]
pub struct TimingStats {
    pub search: Duration,
    pub optimize: Duration,
    pub total: Duration,
}

/// Outcome of one call to `LineTracker::track_frame`.
#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub state: TrackingState,
    /// Whether the pose below is trusted this frame.
    pub valid: bool,
    /// Smoothed output pose.
    pub pose: Pose,
    /// Samples contributing to the final stage.
    pub working_samples: usize,
    /// Final RMS residual (pixels).
    pub error: f64,
    pub stages: [StageStats; 2],
    pub timing: TimingStats,
}

impl TrackingResult {
    pub(crate) fn rejected(state: TrackingState, pose: Pose) -> Self {
        Self {
            state,
            valid: false,
            pose,
            working_samples: 0,
            error: f64::MAX,
            stages: [StageStats::default(), StageStats::default()],
            timing: TimingStats::default(),
        }
    }
}
