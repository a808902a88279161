//! Damped Levenberg-Marquardt loop with reusable workspace buffers.
//!
//! The same loop serves the pose refinement, the ellipse refinement and the
//! homography fit. Problems implement [`LeastSquaresTarget`]; the fitting
//! context lives in the implementing type, so there is no untyped callback
//! context anywhere.
//!
//! The iteration solves
//!
//! ```text
//! (JᵀJ + λ diag(JᵀJ)) δ = -Jᵀ r
//! ```
//!
//! accepting the step when the residual norm decreases, otherwise raising λ.

use nalgebra::{DMatrix, DVector};

/// A nonlinear least-squares problem.
pub trait LeastSquaresTarget {
    fn num_params(&self) -> usize;
    fn num_residuals(&self) -> usize;

    /// Fill `out` (sized `num_residuals`) with residuals at `params`.
    fn residuals(&mut self, params: &DVector<f64>, out: &mut DVector<f64>);

    /// Fill `out` (sized `num_residuals × num_params`) with the Jacobian.
    fn jacobian(&mut self, params: &DVector<f64>, out: &mut DMatrix<f64>);
}

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct LmConfig {
    pub max_iterations: usize,
    pub gradient_tolerance: f64,
    pub param_tolerance: f64,
    pub initial_lambda: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            gradient_tolerance: 1e-10,
            param_tolerance: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

/// Outcome of one solve call.
#[derive(Debug, Clone)]
pub struct LmReport {
    pub iterations: usize,
    /// Initial RMS residual.
    pub initial_cost: f64,
    /// Final RMS residual.
    pub final_cost: f64,
}

/// Explicitly owned scratch buffers, sized on first use and reused across
/// solve calls. Passed by reference into each solve; never process-global.
#[derive(Default)]
pub struct Workspace {
    residuals: DVector<f64>,
    trial_residuals: DVector<f64>,
    jacobian: DMatrix<f64>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn resize(&mut self, num_residuals: usize, num_params: usize) {
        if self.residuals.len() != num_residuals {
            self.residuals = DVector::zeros(num_residuals);
            self.trial_residuals = DVector::zeros(num_residuals);
        }
        if self.jacobian.shape() != (num_residuals, num_params) {
            self.jacobian = DMatrix::zeros(num_residuals, num_params);
        }
    }
}

const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;
const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e10;

fn rms(v: &DVector<f64>) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.norm() / (v.len() as f64).sqrt()
    }
}

/// Minimize the target starting from `params` (updated in place).
pub fn solve<T: LeastSquaresTarget>(
    target: &mut T,
    params: &mut DVector<f64>,
    ws: &mut Workspace,
    config: &LmConfig,
) -> LmReport {
    let num_params = target.num_params();
    let num_residuals = target.num_residuals();
    ws.resize(num_residuals, num_params);

    target.residuals(params, &mut ws.residuals);
    let initial_cost = rms(&ws.residuals);

    if num_residuals == 0 || num_params == 0 {
        return LmReport {
            iterations: 0,
            initial_cost,
            final_cost: initial_cost,
        };
    }

    let mut lambda = config.initial_lambda;
    let mut iterations = 0;
    let mut current_error_sq = ws.residuals.norm_squared();

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        target.jacobian(params, &mut ws.jacobian);

        let gradient = ws.jacobian.transpose() * &ws.residuals;
        if gradient.norm() < config.gradient_tolerance {
            break;
        }

        let jtj = ws.jacobian.transpose() * &ws.jacobian;
        let mut damped = jtj.clone();
        for i in 0..num_params {
            damped[(i, i)] += lambda * damped[(i, i)].max(1e-9);
        }

        let delta = match damped.lu().solve(&(-&gradient)) {
            Some(d) => d,
            None => break, // singular system
        };

        if delta.norm() < config.param_tolerance * (params.norm() + config.param_tolerance) {
            break;
        }

        let trial = &*params + &delta;
        target.residuals(&trial, &mut ws.trial_residuals);
        let trial_error_sq = ws.trial_residuals.norm_squared();

        if trial_error_sq < current_error_sq {
            *params = trial;
            ws.residuals.copy_from(&ws.trial_residuals);
            current_error_sq = trial_error_sq;
            lambda = (lambda * LAMBDA_DOWN).max(MIN_LAMBDA);
        } else {
            lambda = (lambda * LAMBDA_UP).min(MAX_LAMBDA);
        }
    }

    target.residuals(params, &mut ws.residuals);
    LmReport {
        iterations,
        initial_cost,
        final_cost: rms(&ws.residuals),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Fit y = a·x + b to noiseless samples.
    struct LineFit {
        xs: Vec<f64>,
        ys: Vec<f64>,
    }

    impl LeastSquaresTarget for LineFit {
        fn num_params(&self) -> usize {
            2
        }

        fn num_residuals(&self) -> usize {
            self.xs.len()
        }

        fn residuals(&mut self, params: &DVector<f64>, out: &mut DVector<f64>) {
            for (i, (&x, &y)) in self.xs.iter().zip(&self.ys).enumerate() {
                out[i] = params[0] * x + params[1] - y;
            }
        }

        fn jacobian(&mut self, _params: &DVector<f64>, out: &mut DMatrix<f64>) {
            for (i, &x) in self.xs.iter().enumerate() {
                out[(i, 0)] = x;
                out[(i, 1)] = 1.0;
            }
        }
    }

    /// Rosenbrock-style nonlinear residuals.
    struct Rosenbrock;

    impl LeastSquaresTarget for Rosenbrock {
        fn num_params(&self) -> usize {
            2
        }

        fn num_residuals(&self) -> usize {
            2
        }

        fn residuals(&mut self, p: &DVector<f64>, out: &mut DVector<f64>) {
            out[0] = 10.0 * (p[1] - p[0] * p[0]);
            out[1] = 1.0 - p[0];
        }

        fn jacobian(&mut self, p: &DVector<f64>, out: &mut DMatrix<f64>) {
            out[(0, 0)] = -20.0 * p[0];
            out[(0, 1)] = 10.0;
            out[(1, 0)] = -1.0;
            out[(1, 1)] = 0.0;
        }
    }

    #[test]
    fn test_linear_fit_converges_exactly() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x - 3.0).collect();
        let mut problem = LineFit { xs, ys };
        let mut params = DVector::zeros(2);
        let mut ws = Workspace::new();

        let report = solve(&mut problem, &mut params, &mut ws, &LmConfig::default());
        assert_relative_eq!(params[0], 2.0, epsilon = 1e-8);
        assert_relative_eq!(params[1], -3.0, epsilon = 1e-8);
        assert!(report.final_cost < 1e-8);
        assert!(report.final_cost <= report.initial_cost);
    }

    #[test]
    fn test_rosenbrock_converges() {
        let mut params = DVector::from_vec(vec![-1.2, 1.0]);
        let mut ws = Workspace::new();
        let config = LmConfig {
            max_iterations: 200,
            ..LmConfig::default()
        };
        let report = solve(&mut Rosenbrock, &mut params, &mut ws, &config);
        assert_relative_eq!(params[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(params[1], 1.0, epsilon = 1e-6);
        assert!(report.final_cost < 1e-6);
    }

    #[test]
    fn test_workspace_reuse_across_problems() {
        let mut ws = Workspace::new();
        let mut params = DVector::from_vec(vec![0.0, 0.0]);
        let xs: Vec<f64> = (0..4).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| x + 1.0).collect();
        let mut small = LineFit { xs, ys };
        solve(&mut small, &mut params, &mut ws, &LmConfig::default());

        let mut params2 = DVector::from_vec(vec![-1.2, 1.0]);
        let config = LmConfig {
            max_iterations: 200,
            ..LmConfig::default()
        };
        let report = solve(&mut Rosenbrock, &mut params2, &mut ws, &config);
        assert!(report.final_cost < 1e-6);
    }
}
