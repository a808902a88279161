//! Session glue: runs the tracker every frame and, when tracking is lost,
//! feeds detector pose candidates back into the tracker one per frame until
//! one survives initialization.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use crate::detection::{DetectedPoseCandidate, DetectorThread};
use crate::field::{EdgeSearch, FrameAnalysis};
use crate::tracking::{LineTracker, TrackingResult, TrackingState};

pub struct TrackingSession {
    tracker: LineTracker,
    detector: Option<DetectorThread>,
    /// Ranked candidates still waiting for a verification frame.
    pending: VecDeque<DetectedPoseCandidate>,
}

impl TrackingSession {
    pub fn new(tracker: LineTracker, detector: Option<DetectorThread>) -> Self {
        Self {
            tracker,
            detector,
            pending: VecDeque::new(),
        }
    }

    pub fn tracker(&self) -> &LineTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut LineTracker {
        &mut self.tracker
    }

    /// Candidates queued for verification.
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Run one frame: track, and on failure drive the recovery loop.
    pub fn process_frame<F>(&mut self, frame: &mut F) -> TrackingResult
    where
        F: EdgeSearch + FrameAnalysis,
    {
        let result = self.tracker.track_frame(frame);

        match result.state {
            TrackingState::Failed => self.recover(frame),
            TrackingState::Tracking => self.pending.clear(),
            _ => {}
        }
        result
    }

    /// One recovery step: prefer a queued candidate; otherwise hand the
    /// current frame to the idle detector.
    fn recover<F: FrameAnalysis>(&mut self, frame: &mut F) {
        let Some(worker) = &self.detector else {
            return;
        };

        let fresh = worker.take_candidates();
        if !fresh.is_empty() {
            info!(candidates = fresh.len(), "detector produced pose candidates");
            self.pending = fresh.into();
        }

        if let Some(candidate) = self.pending.pop_front() {
            debug!(
                contour_type = candidate.contour_type,
                class = candidate.class_index,
                "verifying pose candidate"
            );
            self.tracker.seed_candidate(candidate.pose);
        } else if worker.is_idle() {
            let field = Arc::new(frame.distance_field().clone());
            worker.process_frame(field);
        }
    }

    /// Stop the detector worker (also happens on drop).
    pub fn shutdown(&mut self) {
        if let Some(worker) = &mut self.detector {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Vector2, Vector3};

    use crate::camera::Pose;
    use crate::config::{CameraMetrics, TrackerParams};
    use crate::field::synthetic::SyntheticScene;
    use crate::model::ModelGeometrySource;

    fn tracker(metrics: CameraMetrics) -> LineTracker {
        let source = ModelGeometrySource::Box {
            extents: Vector3::new(1.0, 1.0, 1.0),
        };
        let params = TrackerParams {
            color_tolerance: 200.0,
            smoothing_factor: 0.0,
            ..TrackerParams::default()
        };
        LineTracker::new(&source, metrics, params)
    }

    fn empty_scene(metrics: &CameraMetrics) -> SyntheticScene {
        let mut scene = SyntheticScene::new(metrics.width, metrics.height);
        scene.set_segments(vec![(Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0))]);
        scene
    }

    #[test]
    fn test_disabled_session_is_inert() {
        let metrics = CameraMetrics::new(640, 480);
        let mut session = TrackingSession::new(tracker(metrics), None);
        let mut scene = empty_scene(&metrics);
        let result = session.process_frame(&mut scene);
        assert_eq!(result.state, TrackingState::Disabled);
        assert_eq!(session.pending_candidates(), 0);
    }

    #[test]
    fn test_failure_without_detector_stays_failed() {
        let metrics = CameraMetrics::new(640, 480);
        let mut session = TrackingSession::new(tracker(metrics), None);
        session.tracker_mut().seed_candidate(Pose::default());

        // An empty scene gives no candidates: the frame fails.
        let mut scene = empty_scene(&metrics);
        let result = session.process_frame(&mut scene);
        assert_eq!(result.state, TrackingState::Failed);
        let again = session.process_frame(&mut scene);
        assert_eq!(again.state, TrackingState::Failed);
    }
}
