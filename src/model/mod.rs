//! The 3-D wireframe model and its per-frame edge sampling state.

pub mod edge_model;
pub mod source;
pub mod types;

pub use edge_model::EdgeModel;
pub use source::{ImportedEdge, ModelGeometrySource};
pub use types::{Candidate, Edge, Sample, MAX_CANDIDATES_PER_SAMPLE, MAX_SAMPLES_PER_EDGE};
