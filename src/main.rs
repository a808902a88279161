//! Demo: track a synthetic box that slides across a rendered scene.
//!
//! Uses the CPU reference implementation of the external compute steps, so
//! it runs without any GPU pipeline attached.

use anyhow::Result;
use nalgebra::{Vector2, Vector3};
use tracing_subscriber::EnvFilter;

use edgetrack::camera::Pose;
use edgetrack::config::{CameraMetrics, TrackerParams};
use edgetrack::field::synthetic::SyntheticScene;
use edgetrack::model::{EdgeModel, ModelGeometrySource};
use edgetrack::session::TrackingSession;
use edgetrack::tracking::LineTracker;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let frames: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let metrics = CameraMetrics::new(640, 480);
    let source = ModelGeometrySource::Box {
        extents: Vector3::new(1.0, 1.0, 1.0),
    };
    let params = TrackerParams {
        color_tolerance: 200.0,
        ..TrackerParams::default()
    };

    let mut session = TrackingSession::new(LineTracker::new(&source, metrics, params), None);
    session.tracker_mut().seed_candidate(Pose::default());

    // Scene renderer: the same box drawn at the ground-truth pose.
    let mut scene_model = EdgeModel::from_source(&source, 0.1, true);
    let mut scene = SyntheticScene::new(metrics.width, metrics.height);

    println!("tracking a synthetic box for {frames} frames");
    for i in 0..frames {
        let t = i as f64 / frames as f64;
        let truth = Pose::new(
            Vector3::new(0.6 * t, 0.2 * (t * std::f64::consts::TAU).sin(), 5.0),
            Vector3::new(0.0, 0.3 * t, 0.0),
            8.0,
        );

        scene_model.transform(&truth, &metrics);
        let mut segments = Vec::new();
        let mut hull_min = Vector2::new(f64::MAX, f64::MAX);
        let mut hull_max = Vector2::new(f64::MIN, f64::MIN);
        for e in scene_model.edges().iter().filter(|e| e.visible) {
            segments.push((e.proj_a, e.proj_b));
            for p in [e.proj_a, e.proj_b] {
                hull_min.x = hull_min.x.min(p.x);
                hull_min.y = hull_min.y.min(p.y);
                hull_max.x = hull_max.x.max(p.x);
                hull_max.y = hull_max.y.max(p.y);
            }
        }
        scene.set_segments(segments);
        scene.set_silhouette(vec![
            Vector2::new(hull_min.x, hull_min.y),
            Vector2::new(hull_max.x, hull_min.y),
            Vector2::new(hull_max.x, hull_max.y),
            Vector2::new(hull_min.x, hull_max.y),
        ]);

        let result = session.process_frame(&mut scene);
        let p = result.pose.translation;
        println!(
            "frame {i:3}  {:?}  error {:6.3} px  samples {:3}  pose [{:+.3} {:+.3} {:+.3}]  truth [{:+.3} {:+.3} {:+.3}]",
            result.state,
            result.error,
            result.working_samples,
            p.x,
            p.y,
            p.z,
            truth.translation.x,
            truth.translation.y,
            truth.translation.z,
        );
    }

    session.shutdown();
    Ok(())
}
