//! Tracker lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle of the per-frame tracker.
///
/// `Initializing` is the only entry into `Tracking`: both a fresh start and
/// detector-recovered pose candidates pass through it, so a pose is never
/// trusted before it has survived one full tracking frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    /// Tracker switched off; frames are ignored.
    Disabled,
    /// A candidate pose is being verified.
    Initializing,
    /// Pose locked; results are valid.
    Tracking,
    /// Lost; waiting for a recovery candidate.
    Failed,
}

impl TrackingState {
    /// Whether the tracker processes frames in this state.
    pub fn is_active(&self) -> bool {
        !matches!(self, TrackingState::Disabled)
    }

    /// Whether the pose estimate is currently trusted.
    pub fn is_tracking(&self) -> bool {
        matches!(self, TrackingState::Tracking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!TrackingState::Disabled.is_active());
        assert!(TrackingState::Failed.is_active());
        assert!(TrackingState::Tracking.is_tracking());
        assert!(!TrackingState::Initializing.is_tracking());
    }
}
