//! Camera pose state: the 7-parameter pose value type and the per-session
//! pose history/prediction track.

pub mod pose;
pub mod track;

pub use pose::{Pose, FOCAL_MULTIPLIER, POSE_DIM};
pub use track::{CameraPoseTrack, HISTORY_LEN};
