//! One traced silhouette fragment: ordered pixel list, fitted ellipse,
//! normalization transform and enclosing quad.

use nalgebra::{DMatrix, DVector, Matrix3, Rotation2, Vector2};

use crate::detection::apply_homography;
use crate::solver::{self, LeastSquaresTarget, LmConfig, Workspace};

/// Radius padding applied around the tightened ellipse (pixels).
const ELLIPSE_MARGIN: f64 = 1.0;

/// Fitted ellipse: center, radii (major first after canonicalization), tilt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ellipse {
    pub center: Vector2<f64>,
    pub radii: Vector2<f64>,
    pub tilt: f64,
}

/// One contour fragment. Transient: created per detection pass.
#[derive(Debug, Clone)]
pub struct Contour {
    pub points: Vec<Vector2<f64>>,
    pub closed: bool,
    pub valid: bool,
    /// Which model contour this fragment belongs to (assigned in training).
    pub contour_type: usize,

    pub barycenter: Vector2<f64>,
    pub bbox_min: Vector2<f64>,
    pub bbox_max: Vector2<f64>,
    pub ellipse: Ellipse,
    /// Corners of the ellipse-aligned enclosing box, in image coordinates.
    pub quad: [Vector2<f64>; 4],
    /// Maps image coordinates into the unit-centered contour frame.
    pub normalization: Matrix3<f64>,
}

/// Signed approximate point-to-ellipse distance, scaled to pixels by the
/// mean radius. Parameters: {cx, cy, rx, ry, tilt}.
struct EllipseFit<'a> {
    points: &'a [Vector2<f64>],
}

impl EllipseFit<'_> {
    fn residual(p: &DVector<f64>, point: &Vector2<f64>) -> f64 {
        let (rx, ry) = (p[2].abs().max(1e-6), p[3].abs().max(1e-6));
        let d = point - Vector2::new(p[0], p[1]);
        let rot = Rotation2::new(-p[4]);
        let q = rot * d;
        let s = ((q.x / rx) * (q.x / rx) + (q.y / ry) * (q.y / ry)).sqrt();
        (s - 1.0) * 0.5 * (rx + ry)
    }
}

impl LeastSquaresTarget for EllipseFit<'_> {
    fn num_params(&self) -> usize {
        5
    }

    fn num_residuals(&self) -> usize {
        self.points.len()
    }

    fn residuals(&mut self, params: &DVector<f64>, out: &mut DVector<f64>) {
        for (i, pt) in self.points.iter().enumerate() {
            out[i] = Self::residual(params, pt);
        }
    }

    fn jacobian(&mut self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
        const EPS: f64 = 1e-5;
        for k in 0..5 {
            let mut plus = params.clone();
            plus[k] += EPS;
            for (i, pt) in self.points.iter().enumerate() {
                out[(i, k)] = (Self::residual(&plus, pt) - Self::residual(params, pt)) / EPS;
            }
        }
    }
}

impl Contour {
    pub fn new(points: Vec<Vector2<f64>>, closed: bool) -> Self {
        Self {
            points,
            closed,
            valid: false,
            contour_type: 0,
            barycenter: Vector2::zeros(),
            bbox_min: Vector2::zeros(),
            bbox_max: Vector2::zeros(),
            ellipse: Ellipse::default(),
            quad: [Vector2::zeros(); 4],
            normalization: Matrix3::identity(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Barycenter and axis-aligned bounding box of the raw points.
    pub fn compute_stats(&mut self) {
        let n = self.points.len().max(1) as f64;
        let mut sum = Vector2::zeros();
        let mut min = Vector2::new(f64::MAX, f64::MAX);
        let mut max = Vector2::new(f64::MIN, f64::MIN);
        for p in &self.points {
            sum += p;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        self.barycenter = sum / n;
        self.bbox_min = min;
        self.bbox_max = max;
    }

    /// Fit the ellipse, canonicalize its axes, tighten it around the points
    /// and derive the normalization transform and enclosing quad.
    ///
    /// Sets `valid` on success.
    pub fn normalize(&mut self, workspace: &mut Workspace) {
        self.compute_stats();
        self.fit_ellipse(workspace);
        self.canonicalize_axes();
        self.tighten();
        self.derive_normalization();
        self.valid = true;
    }

    /// Closed-form moments estimate refined by LM against the signed
    /// approximate ellipse distance.
    fn fit_ellipse(&mut self, workspace: &mut Workspace) {
        let n = self.points.len() as f64;
        let c = self.barycenter;
        let (mut mxx, mut myy, mut mxy) = (0.0, 0.0, 0.0);
        for p in &self.points {
            let d = p - c;
            mxx += d.x * d.x;
            myy += d.y * d.y;
            mxy += d.x * d.y;
        }
        mxx /= n;
        myy /= n;
        mxy /= n;

        // Eigen-decomposition of the 2×2 covariance.
        let tilt = 0.5 * (2.0 * mxy).atan2(mxx - myy);
        let half = 0.5 * (mxx + myy);
        let root = (0.25 * (mxx - myy) * (mxx - myy) + mxy * mxy).sqrt();
        // Outline points of an ellipse have variance r²/2 along each axis.
        let r_major = (2.0 * (half + root)).max(1e-6).sqrt();
        let r_minor = (2.0 * (half - root)).max(1e-6).sqrt();

        let mut params =
            DVector::from_vec(vec![c.x, c.y, r_major, r_minor, tilt]);
        let mut fit = EllipseFit {
            points: &self.points,
        };
        let config = LmConfig {
            max_iterations: 10,
            ..LmConfig::default()
        };
        solver::solve(&mut fit, &mut params, workspace, &config);

        self.ellipse = Ellipse {
            center: Vector2::new(params[0], params[1]),
            radii: Vector2::new(params[2].abs(), params[3].abs()),
            tilt: params[4],
        };
    }

    /// Major axis first, tilt wrapped into (-π/2, π/2].
    fn canonicalize_axes(&mut self) {
        let e = &mut self.ellipse;
        if e.radii.x < e.radii.y {
            e.radii = Vector2::new(e.radii.y, e.radii.x);
            e.tilt += std::f64::consts::FRAC_PI_2;
        }
        while e.tilt > std::f64::consts::FRAC_PI_2 {
            e.tilt -= std::f64::consts::PI;
        }
        while e.tilt <= -std::f64::consts::FRAC_PI_2 {
            e.tilt += std::f64::consts::PI;
        }
    }

    /// Scale both radii so the farthest point sits exactly on the ellipse,
    /// plus a small margin.
    fn tighten(&mut self) {
        let e = &mut self.ellipse;
        let rot = Rotation2::new(-e.tilt);
        let mut s_max: f64 = 0.0;
        for p in &self.points {
            let q = rot * (p - e.center);
            let s = ((q.x / e.radii.x) * (q.x / e.radii.x)
                + (q.y / e.radii.y) * (q.y / e.radii.y))
                .sqrt();
            s_max = s_max.max(s);
        }
        if s_max > 0.0 {
            e.radii *= s_max;
        }
        e.radii += Vector2::new(ELLIPSE_MARGIN, ELLIPSE_MARGIN);
    }

    /// Normalization N = S(1/r) · R(−tilt) · T(−center): maps image points
    /// into the unit-centered contour frame. The quad is the aligned
    /// enclosing box mapped back to image coordinates.
    fn derive_normalization(&mut self) {
        let e = &self.ellipse;
        let (cos, sin) = (e.tilt.cos(), e.tilt.sin());

        let mut translate = Matrix3::identity();
        translate[(0, 2)] = -e.center.x;
        translate[(1, 2)] = -e.center.y;
        let rotate = Matrix3::new(cos, sin, 0.0, -sin, cos, 0.0, 0.0, 0.0, 1.0);
        let scale = Matrix3::new(
            1.0 / e.radii.x,
            0.0,
            0.0,
            0.0,
            1.0 / e.radii.y,
            0.0,
            0.0,
            0.0,
            1.0,
        );
        self.normalization = scale * rotate * translate;

        let rot = Rotation2::new(e.tilt);
        let corners = [
            Vector2::new(-e.radii.x, -e.radii.y),
            Vector2::new(e.radii.x, -e.radii.y),
            Vector2::new(e.radii.x, e.radii.y),
            Vector2::new(-e.radii.x, e.radii.y),
        ];
        for (i, corner) in corners.iter().enumerate() {
            self.quad[i] = e.center + rot * corner;
        }
    }

    /// Contour points mapped into the unit-centered frame.
    pub fn normalized_points(&self) -> Vec<Vector2<f64>> {
        self.points
            .iter()
            .map(|p| apply_homography(&self.normalization, p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn circle(center: Vector2<f64>, radius: f64, n: usize) -> Vec<Vector2<f64>> {
        (0..n)
            .map(|i| {
                let a = i as f64 / n as f64 * std::f64::consts::TAU;
                center + Vector2::new(radius * a.cos(), radius * a.sin())
            })
            .collect()
    }

    #[test]
    fn test_circle_fit_recovers_center_and_radius() {
        let mut c = Contour::new(circle(Vector2::new(100.0, 80.0), 30.0, 200), true);
        let mut ws = Workspace::new();
        c.normalize(&mut ws);
        assert!(c.valid);
        assert_relative_eq!(c.ellipse.center.x, 100.0, epsilon = 0.5);
        assert_relative_eq!(c.ellipse.center.y, 80.0, epsilon = 0.5);
        // Tightened + margin: just above the true radius.
        assert!(c.ellipse.radii.x >= 30.0 && c.ellipse.radii.x < 32.5);
        assert!(c.ellipse.radii.y >= 30.0 && c.ellipse.radii.y < 32.5);
    }

    #[test]
    fn test_major_axis_first() {
        // Ellipse taller than wide: after canonicalization the major radius
        // comes first and the tilt reflects the vertical orientation.
        let points: Vec<_> = (0..200)
            .map(|i| {
                let a = i as f64 / 200.0 * std::f64::consts::TAU;
                Vector2::new(50.0 + 10.0 * a.cos(), 50.0 + 25.0 * a.sin())
            })
            .collect();
        let mut c = Contour::new(points, true);
        let mut ws = Workspace::new();
        c.normalize(&mut ws);
        assert!(c.ellipse.radii.x >= c.ellipse.radii.y);
        assert!(c.ellipse.radii.x > 20.0);
    }

    #[test]
    fn test_normalization_maps_points_into_unit_disk() {
        let mut c = Contour::new(circle(Vector2::new(10.0, -5.0), 12.0, 120), true);
        let mut ws = Workspace::new();
        c.normalize(&mut ws);
        for q in c.normalized_points() {
            assert!(q.norm() <= 1.0 + 1e-9, "point outside unit disk: {q:?}");
        }
    }

    #[test]
    fn test_quad_encloses_points() {
        let mut c = Contour::new(circle(Vector2::new(64.0, 64.0), 20.0, 160), true);
        let mut ws = Workspace::new();
        c.normalize(&mut ws);
        // Quad corners are farther from the center than every contour point.
        let corner_dist = (c.quad[0] - c.ellipse.center).norm();
        for p in &c.points {
            assert!((p - c.ellipse.center).norm() <= corner_dist);
        }
    }
}
