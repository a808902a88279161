//! SO(3) Lie group utilities for exponential-map rotations.
//!
//! The camera pose stores its rotation as a 3-vector whose direction is the
//! rotation axis and whose magnitude is the rotation angle. This module
//! provides the conversion to and from rotation matrices.

use nalgebra::{Matrix3, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-8;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Rodrigues formula: R = exp([φ]×).
///
/// For small angles falls back to the first-order expansion I + [φ]×.
pub fn exp_map(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + skew(phi);
    }

    let k = skew(&(phi / theta));
    Matrix3::identity() + theta.sin() * k + (1.0 - theta.cos()) * (k * k)
}

/// Inverse of `exp_map`: recovers the axis-angle vector from a rotation matrix.
pub fn log_map(r: &Matrix3<f64>) -> Vector3<f64> {
    let cos_theta = ((r.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();

    let axis = Vector3::new(
        r[(2, 1)] - r[(1, 2)],
        r[(0, 2)] - r[(2, 0)],
        r[(1, 0)] - r[(0, 1)],
    );

    if theta < SMALL_ANGLE_THRESHOLD {
        return axis * 0.5;
    }

    axis * (theta / (2.0 * theta.sin()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(4.0, 5.0, 6.0);

        let cross_direct = v.cross(&u);
        let cross_skew = skew(&v) * u;

        assert_relative_eq!(cross_direct, cross_skew, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_map_identity_at_zero() {
        let r = exp_map(&Vector3::zeros());
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_exp_map_is_rotation() {
        let r = exp_map(&Vector3::new(0.3, -0.7, 0.2));
        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-10);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_log_exp_round_trip() {
        let phi = Vector3::new(0.4, 0.1, -0.9);
        let recovered = log_map(&exp_map(&phi));
        assert_relative_eq!(phi, recovered, epsilon = 1e-9);
    }

    #[test]
    fn test_log_exp_small_angle() {
        let phi = Vector3::new(1e-10, -2e-10, 3e-10);
        let recovered = log_map(&exp_map(&phi));
        assert_relative_eq!(phi, recovered, epsilon = 1e-15);
    }
}
