//! Monocular model-based 6-DoF pose tracking.
//!
//! Per frame, an edge-based tracker refines the camera pose aligning a known
//! wireframe model with the image; when tracking is lost, a background
//! detector classifies silhouette contours with a ferns classifier and
//! reconstructs pose candidates from homography fits. GPU work (edge
//! detection, distance transform, depth readback, batched edge search) is
//! consumed through the traits in [`field`].

pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod field;
pub mod geometry;
pub mod io;
pub mod model;
pub mod session;
pub mod solver;
pub mod tracking;

pub use camera::{CameraPoseTrack, Pose};
pub use config::{CameraMetrics, DetectorParams, TrackerParams, TrainingParams};
pub use error::{EdgetrackError, Result};
pub use session::TrackingSession;
pub use tracking::{LineTracker, TrackingResult, TrackingState};
