//! Nonlinear least-squares machinery shared by the tracker and the detector:
//! a damped Levenberg-Marquardt loop over a typed problem trait, an explicitly
//! owned workspace for the solver buffers, and the robust loss functions.

pub mod lm;
pub mod robust;

pub use lm::{solve, LeastSquaresTarget, LmConfig, LmReport, Workspace};
pub use robust::RobustKind;
