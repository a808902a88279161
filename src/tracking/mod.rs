//! Per-frame tracking: state machine, robust two-stage pose refinement and
//! the frame report.

pub mod line_tracker;
pub mod result;
pub mod state;
pub mod stats;

pub use line_tracker::{LineTracker, MIN_WORKING_SAMPLES};
pub use result::{StageStats, TimingStats, TrackingResult};
pub use state::TrackingState;
