//! The 7-parameter camera pose value type.
//!
//! A pose is {tx, ty, tz, rx, ry, rz, focal}: translation, exponential-map
//! rotation and focal length. It is an immutable value converted to 4×4
//! matrices on demand; all pose arithmetic used by prediction and smoothing
//! is plain component-wise arithmetic on the 7-vector.

use nalgebra::{DVector, Matrix3, Matrix4, Point3, SVector, Vector2, Vector3};

use crate::config::CameraMetrics;
use crate::geometry::{exp_map, log_map};

/// Number of pose parameters.
pub const POSE_DIM: usize = 7;

/// Internal multiplier applied to the focal parameter to obtain pixels.
/// Keeps the focal parameter in the same magnitude range as the others
/// during optimization.
pub const FOCAL_MULTIPLIER: f64 = 100.0;

/// Camera pose: translation, exp-map rotation, focal length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub translation: Vector3<f64>,
    pub rotation: Vector3<f64>,
    /// Focal parameter; multiply by [`FOCAL_MULTIPLIER`] for pixels.
    pub focal: f64,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            translation: Vector3::new(0.0, 0.0, 5.0),
            rotation: Vector3::zeros(),
            focal: 8.0,
        }
    }
}

impl Pose {
    pub fn new(translation: Vector3<f64>, rotation: Vector3<f64>, focal: f64) -> Self {
        Self {
            translation,
            rotation,
            focal,
        }
    }

    /// Focal length in pixels.
    #[inline]
    pub fn focal_px(&self) -> f64 {
        self.focal * FOCAL_MULTIPLIER
    }

    /// Rotation matrix R = exp([r]×).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        exp_map(&self.rotation)
    }

    /// Model-to-camera transform.
    pub fn view_matrix(&self) -> Matrix4<f64> {
        let r = self.rotation_matrix();
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Pinhole projection to pixel coordinates (after the homogeneous divide
    /// by the w row, which carries camera-space depth).
    pub fn projection_matrix(&self, metrics: &CameraMetrics) -> Matrix4<f64> {
        let f = self.focal_px();
        Matrix4::new(
            f, 0.0, metrics.cx, 0.0,
            0.0, f, metrics.cy, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
        )
    }

    /// Combined model-view-projection matrix.
    pub fn view_projection(&self, metrics: &CameraMetrics) -> Matrix4<f64> {
        self.projection_matrix(metrics) * self.view_matrix()
    }

    /// Intrinsics as a 3×3 matrix (for the homography-based pose recovery).
    pub fn intrinsics(&self, metrics: &CameraMetrics) -> Matrix3<f64> {
        let f = self.focal_px();
        Matrix3::new(f, 0.0, metrics.cx, 0.0, f, metrics.cy, 0.0, 0.0, 1.0)
    }

    /// Pose scalars as a 7-vector (focal unscaled by its internal multiplier).
    pub fn as_vector(&self) -> SVector<f64, POSE_DIM> {
        SVector::<f64, POSE_DIM>::from_column_slice(&[
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.focal,
        ])
    }

    pub fn from_vector(v: &SVector<f64, POSE_DIM>) -> Self {
        Self {
            translation: Vector3::new(v[0], v[1], v[2]),
            rotation: Vector3::new(v[3], v[4], v[5]),
            focal: v[6],
        }
    }

    /// Single pose scalar by index, 0..=6.
    pub fn param(&self, index: usize) -> f64 {
        self.as_vector()[index]
    }

    /// Apply an optimizer delta (6 parameters, or 7 with focal).
    pub fn apply_delta(&self, delta: &DVector<f64>) -> Self {
        let mut v = self.as_vector();
        for (i, d) in delta.iter().enumerate().take(POSE_DIM) {
            v[i] += d;
        }
        Self::from_vector(&v)
    }

    /// Linear blend of the raw parameter vectors.
    pub fn lerp(&self, other: &Pose, t: f64) -> Self {
        Self::from_vector(&(self.as_vector() * (1.0 - t) + other.as_vector() * t))
    }

    /// Arithmetic mean of a non-empty pose slice.
    pub fn mean_of(poses: &[Pose]) -> Self {
        let mut acc = SVector::<f64, POSE_DIM>::zeros();
        for p in poses {
            acc += p.as_vector();
        }
        Self::from_vector(&(acc / poses.len() as f64))
    }

    /// Build a pose from a rotation matrix and translation.
    pub fn from_rotation_translation(r: &Matrix3<f64>, t: &Vector3<f64>, focal: f64) -> Self {
        Self {
            translation: *t,
            rotation: log_map(r),
            focal,
        }
    }

    /// Project a model-space point with the given MVP matrix.
    pub fn project_point(mvp: &Matrix4<f64>, p: &Point3<f64>) -> Vector2<f64> {
        let h = mvp * p.to_homogeneous();
        Vector2::new(h.x / h.w, h.y / h.w)
    }
}
