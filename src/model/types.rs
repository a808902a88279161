//! Edge / sample / candidate data carried by the edge model.
//!
//! All capacities are explicit: pushing past a limit drops the item and logs
//! a warning instead of growing (or corrupting) the container.

use nalgebra::{Point3, Vector2, Vector3};
use tracing::warn;

/// Fixed sample-slot capacity per edge.
pub const MAX_SAMPLES_PER_EDGE: usize = 32;

/// Candidate capacity per sample slot.
pub const MAX_CANDIDATES_PER_SAMPLE: usize = 8;

/// One edge-search hit for a sample.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Image position of the candidate.
    pub position: Vector2<f64>,
    /// Edge-response strength.
    pub response: f64,
    /// Color-match score against the sample's reference colors.
    pub color_match: f64,
    /// Signed distance to the sample along the edge normal.
    pub signed_distance: f64,
    pub abs_distance: f64,
    pub valid: bool,
}

/// One sample slot along an edge.
///
/// Slots are allocated once at model load; candidate lists are cleared and
/// rebuilt every frame, while the reference colors and presence flag persist
/// across frames.
#[derive(Debug, Clone)]
pub struct Sample {
    pub slot: usize,
    /// Model-space point sampled on the edge.
    pub point: Point3<f64>,
    /// Projected image position (current frame).
    pub position: Vector2<f64>,
    /// Unit image normal of the projected edge.
    pub normal: Vector2<f64>,
    /// Camera-space depth (for visibility tests).
    pub depth: f64,
    pub candidates: Vec<Candidate>,
    /// Index of the selected candidate hypothesis.
    pub hypothesis: Option<usize>,
    pub inlier: bool,
    /// Whether this slot had candidates in the previous frame.
    pub was_present: bool,
    /// Reference colors on either side of the edge.
    pub ref_colors: [f64; 2],
    /// Freshly observed side colors (this frame).
    pub fresh_colors: [f64; 2],
    /// Slot participates in this frame (within the projected edge length).
    pub active: bool,
}

impl Sample {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            point: Point3::origin(),
            position: Vector2::zeros(),
            normal: Vector2::zeros(),
            depth: 0.0,
            candidates: Vec::with_capacity(MAX_CANDIDATES_PER_SAMPLE),
            hypothesis: None,
            inlier: true,
            was_present: false,
            ref_colors: [0.0; 2],
            fresh_colors: [0.0; 2],
            active: false,
        }
    }

    /// Checked candidate push; drops the candidate when the slot is full.
    pub fn push_candidate(&mut self, candidate: Candidate) -> bool {
        if self.candidates.len() >= MAX_CANDIDATES_PER_SAMPLE {
            warn!(slot = self.slot, "candidate list full, dropping candidate");
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    /// The currently selected candidate, if any.
    pub fn hypothesis_candidate(&self) -> Option<&Candidate> {
        self.hypothesis.and_then(|i| self.candidates.get(i))
    }
}

/// One model edge: endpoints, the two adjacent face normals and the sampling
/// state. Owned by the edge model, created at model load.
#[derive(Debug, Clone)]
pub struct Edge {
    pub a: Point3<f64>,
    pub b: Point3<f64>,
    /// Adjacent face normals (zero when the model carries no face info).
    pub normal_left: Vector3<f64>,
    pub normal_right: Vector3<f64>,
    /// Samples per projected pixel of edge length.
    pub density: f64,
    pub samples: Vec<Sample>,

    // Per-frame projected state.
    pub proj_a: Vector2<f64>,
    pub proj_b: Vector2<f64>,
    /// Unit image normal of the projected edge.
    pub image_normal: Vector2<f64>,
    /// Projected (camera-space) adjacent face normals.
    pub cam_normal_left: Vector3<f64>,
    pub cam_normal_right: Vector3<f64>,
    pub visible: bool,
    /// Number of active sample slots this frame.
    pub active_samples: usize,
}

impl Edge {
    pub fn new(a: Point3<f64>, b: Point3<f64>, density: f64) -> Self {
        Self {
            a,
            b,
            normal_left: Vector3::zeros(),
            normal_right: Vector3::zeros(),
            density,
            samples: (0..MAX_SAMPLES_PER_EDGE).map(Sample::new).collect(),
            proj_a: Vector2::zeros(),
            proj_b: Vector2::zeros(),
            image_normal: Vector2::zeros(),
            cam_normal_left: Vector3::zeros(),
            cam_normal_right: Vector3::zeros(),
            visible: false,
            active_samples: 0,
        }
    }

    pub fn with_normals(mut self, left: Vector3<f64>, right: Vector3<f64>) -> Self {
        self.normal_left = left;
        self.normal_right = right;
        self
    }

    /// Model-space point at parameter t ∈ [0,1] along the edge.
    pub fn point_at(&self, t: f64) -> Point3<f64> {
        self.a + (self.b - self.a) * t
    }
}
