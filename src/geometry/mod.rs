//! Geometry utilities: SO(3) exponential map and projection helpers.

pub mod so3;

pub use so3::{exp_map, log_map, skew};
