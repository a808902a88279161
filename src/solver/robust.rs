//! Robust loss functions for the edge residual optimization.
//!
//! The tracker weights residuals with the IRLS weight w(r) = ρ'(r)/r of the
//! configured estimator, down-weighting outlier candidates instead of
//! rejecting them outright.

use serde::{Deserialize, Serialize};

/// Robust estimator selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobustKind {
    /// Plain squared loss (no down-weighting).
    Squared,
    /// Huber loss: quadratic near zero, linear beyond the limit.
    Huber,
    /// Tukey biweight: redescending, zero weight beyond the limit.
    Tukey,
}

impl RobustKind {
    /// IRLS weight w(r) = ρ'(r)/r for residual `r` and limit parameter `k`.
    pub fn weight(&self, r: f64, k: f64) -> f64 {
        let a = r.abs();
        match self {
            RobustKind::Squared => 1.0,
            RobustKind::Huber => {
                if a <= k {
                    1.0
                } else {
                    k / a
                }
            }
            RobustKind::Tukey => {
                if a <= k {
                    let u = 1.0 - (a / k) * (a / k);
                    u * u
                } else {
                    0.0
                }
            }
        }
    }

    /// Loss value ρ(r).
    pub fn rho(&self, r: f64, k: f64) -> f64 {
        let a = r.abs();
        match self {
            RobustKind::Squared => r * r,
            RobustKind::Huber => {
                if a <= k {
                    r * r
                } else {
                    k * (2.0 * a - k)
                }
            }
            RobustKind::Tukey => {
                let k2 = k * k;
                if a <= k {
                    let u = 1.0 - (a / k) * (a / k);
                    k2 / 3.0 * (1.0 - u * u * u)
                } else {
                    k2 / 3.0
                }
            }
        }
    }
}
