//! Learned contour template: a signed distance map plus unit gradient map
//! over the normalized contour frame, and the homography fit of a query
//! contour against those maps.

use nalgebra::{DMatrix, DVector, Matrix3, Vector2};

use crate::solver::{self, LeastSquaresTarget, LmConfig, Workspace};

/// Result of one homography fit.
#[derive(Debug, Clone)]
pub struct HomographyFit {
    /// Maps query-normalized coordinates onto the template frame
    /// (bottom-right element fixed to 1).
    pub homography: Matrix3<f64>,
    /// Mean squared residual in map pixels.
    pub mse: f64,
    pub det: f64,
    pub iterations: usize,
}

/// Distance + gradient maps of one learned contour shape.
#[derive(Debug, Clone)]
pub struct ContourTemplate {
    pub(crate) size: usize,
    /// Signed distance to the contour, negative inside (map pixels).
    pub(crate) distance: Vec<f32>,
    /// Unit gradient of the signed distance.
    pub(crate) gradient: Vec<(f32, f32)>,
}

impl ContourTemplate {
    /// Build the maps from a contour's normalized point list.
    pub fn create_maps(normalized: &[Vector2<f64>], size: usize) -> Self {
        let half = 0.5 * (size - 1) as f64;
        let to_map = |q: &Vector2<f64>| Vector2::new((q.x + 1.0) * half, (q.y + 1.0) * half);

        // Rasterize the closed polyline into a seed mask.
        let mut dist = vec![f32::MAX; size * size];
        let mut off = vec![(0.0f32, 0.0f32); size * size];
        let n = normalized.len();
        for i in 0..n {
            let a = to_map(&normalized[i]);
            let b = to_map(&normalized[(i + 1) % n]);
            let len = (b - a).norm();
            let steps = (len.ceil() as usize).max(1) * 2;
            for s in 0..=steps {
                let p = a + (b - a) * (s as f64 / steps as f64);
                let x = p.x.round() as i64;
                let y = p.y.round() as i64;
                if x >= 0 && y >= 0 && (x as usize) < size && (y as usize) < size {
                    dist[y as usize * size + x as usize] = 0.0;
                }
            }
        }

        propagate(&mut dist, &mut off, size);

        // Sign by the even-odd rule over the normalized polygon; the stored
        // gradient is the derivative of the signed value.
        let mut distance = vec![0.0f32; size * size];
        let mut gradient = vec![(0.0f32, 0.0f32); size * size];
        for y in 0..size {
            for x in 0..size {
                let i = y * size + x;
                let q = Vector2::new(x as f64 / half - 1.0, y as f64 / half - 1.0);
                let inside = point_in_polygon(&q, normalized);
                let len = (off[i].0 * off[i].0 + off[i].1 * off[i].1).sqrt();
                let (mut g, d) = if len > 0.0 {
                    ((-off[i].0 / len, -off[i].1 / len), dist[i])
                } else {
                    ((0.0, 0.0), dist[i])
                };
                if inside {
                    g = (-g.0, -g.1);
                }
                distance[i] = if inside { -d } else { d };
                gradient[i] = g;
            }
        }

        Self {
            size,
            distance,
            gradient,
        }
    }

    pub(crate) fn from_parts(size: usize, distance: Vec<f32>, gradient: Vec<(f32, f32)>) -> Self {
        Self {
            size,
            distance,
            gradient,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Bilinear signed-distance lookup at map coordinates, clamped.
    pub fn distance_at(&self, p: &Vector2<f64>) -> f64 {
        let max = (self.size - 1) as f64;
        let x = p.x.clamp(0.0, max);
        let y = p.y.clamp(0.0, max);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.size - 1);
        let y1 = (y0 + 1).min(self.size - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let d = |xx: usize, yy: usize| self.distance[yy * self.size + xx] as f64;
        let top = d(x0, y0) * (1.0 - fx) + d(x1, y0) * fx;
        let bottom = d(x0, y1) * (1.0 - fx) + d(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Nearest-pixel gradient lookup at map coordinates, clamped.
    pub fn gradient_at(&self, p: &Vector2<f64>) -> Vector2<f64> {
        let max = (self.size - 1) as f64;
        let x = p.x.clamp(0.0, max).round() as usize;
        let y = p.y.clamp(0.0, max).round() as usize;
        let g = self.gradient[y * self.size + x];
        Vector2::new(g.0 as f64, g.1 as f64)
    }

    /// Fit an 8-parameter homography mapping `normalized` query points onto
    /// this template, minimizing the looked-up signed distance per point.
    pub fn match_contour(
        &self,
        normalized: &[Vector2<f64>],
        workspace: &mut Workspace,
    ) -> HomographyFit {
        let mut target = HomographyTarget {
            template: self,
            points: normalized,
        };
        let mut params = DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        let config = LmConfig {
            max_iterations: 30,
            ..LmConfig::default()
        };
        let report = solver::solve(&mut target, &mut params, workspace, &config);

        let h = homography_from(&params);
        HomographyFit {
            homography: h,
            mse: report.final_cost * report.final_cost,
            det: h.determinant(),
            iterations: report.iterations,
        }
    }
}

fn homography_from(p: &DVector<f64>) -> Matrix3<f64> {
    Matrix3::new(p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7], 1.0)
}

/// Two-pass 4-neighbor chamfer relaxation with offset tracking.
fn propagate(dist: &mut [f32], off: &mut [(f32, f32)], size: usize) {
    let relax = |dist: &mut [f32], off: &mut [(f32, f32)], to: usize, from: usize, dx: f32, dy: f32| {
        if dist[from] == f32::MAX {
            return;
        }
        let ox = off[from].0 + dx;
        let oy = off[from].1 + dy;
        let d = (ox * ox + oy * oy).sqrt();
        if d < dist[to] {
            dist[to] = d;
            off[to] = (ox, oy);
        }
    };

    for y in 0..size {
        for x in 0..size {
            let i = y * size + x;
            if x > 0 {
                relax(dist, off, i, i - 1, -1.0, 0.0);
            }
            if y > 0 {
                relax(dist, off, i, i - size, 0.0, -1.0);
            }
        }
    }
    for y in (0..size).rev() {
        for x in (0..size).rev() {
            let i = y * size + x;
            if x + 1 < size {
                relax(dist, off, i, i + 1, 1.0, 0.0);
            }
            if y + 1 < size {
                relax(dist, off, i, i + size, 0.0, 1.0);
            }
        }
    }
}

fn point_in_polygon(p: &Vector2<f64>, polygon: &[Vector2<f64>]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Homography fit problem: residual per contour point is the template's
/// signed distance at the warped, denormalized lookup position.
struct HomographyTarget<'a> {
    template: &'a ContourTemplate,
    points: &'a [Vector2<f64>],
}

impl HomographyTarget<'_> {
    #[inline]
    fn scale(&self) -> f64 {
        0.5 * (self.template.size - 1) as f64
    }
}

impl LeastSquaresTarget for HomographyTarget<'_> {
    fn num_params(&self) -> usize {
        8
    }

    fn num_residuals(&self) -> usize {
        self.points.len()
    }

    fn residuals(&mut self, params: &DVector<f64>, out: &mut DVector<f64>) {
        let h = homography_from(params);
        let s = self.scale();
        for (i, p) in self.points.iter().enumerate() {
            let q = crate::detection::apply_homography(&h, p);
            let m = Vector2::new((q.x + 1.0) * s, (q.y + 1.0) * s);
            out[i] = self.template.distance_at(&m);
        }
    }

    fn jacobian(&mut self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
        let s = self.scale();
        for (i, p) in self.points.iter().enumerate() {
            let (x, y) = (p.x, p.y);
            let wz = params[6] * x + params[7] * y + 1.0;
            let u = (params[0] * x + params[1] * y + params[2]) / wz;
            let v = (params[3] * x + params[4] * y + params[5]) / wz;
            let m = Vector2::new((u + 1.0) * s, (v + 1.0) * s);
            let g = self.template.gradient_at(&m);

            let gu = g.x * s;
            let gv = g.y * s;
            out[(i, 0)] = gu * x / wz;
            out[(i, 1)] = gu * y / wz;
            out[(i, 2)] = gu / wz;
            out[(i, 3)] = gv * x / wz;
            out[(i, 4)] = gv * y / wz;
            out[(i, 5)] = gv / wz;
            out[(i, 6)] = -(gu * u + gv * v) * x / wz;
            out[(i, 7)] = -(gu * u + gv * v) * y / wz;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn circle_points(n: usize, r: f64, offset: Vector2<f64>) -> Vec<Vector2<f64>> {
        (0..n)
            .map(|i| {
                let a = i as f64 / n as f64 * std::f64::consts::TAU;
                offset + Vector2::new(r * a.cos(), r * a.sin())
            })
            .collect()
    }

    #[test]
    fn test_maps_signed_inside_negative() {
        let t = ContourTemplate::create_maps(&circle_points(180, 0.8, Vector2::zeros()), 64);
        let center = Vector2::new(31.5, 31.5);
        assert!(t.distance_at(&center) < 0.0, "center should be inside");
        // On the circle itself the distance vanishes.
        let s = 31.5;
        let on_edge = Vector2::new((0.8 + 1.0) * s, s);
        assert!(t.distance_at(&on_edge).abs() < 1.5);
    }

    #[test]
    fn test_self_match_is_identity() {
        let points = circle_points(180, 0.8, Vector2::zeros());
        let t = ContourTemplate::create_maps(&points, 64);
        let mut ws = Workspace::new();
        let fit = t.match_contour(&points, &mut ws);

        assert!(fit.mse < 1.0, "mse = {}", fit.mse);
        assert_relative_eq!(fit.homography[(0, 0)], 1.0, epsilon = 0.05);
        assert_relative_eq!(fit.homography[(1, 1)], 1.0, epsilon = 0.05);
        assert_relative_eq!(fit.det, 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_match_recovers_translation() {
        let template_points = circle_points(180, 0.7, Vector2::zeros());
        let t = ContourTemplate::create_maps(&template_points, 64);

        let query = circle_points(180, 0.7, Vector2::new(0.1, -0.05));
        let mut ws = Workspace::new();
        let fit = t.match_contour(&query, &mut ws);

        // The homography must shift the query back onto the template.
        assert!(fit.mse < 1.0, "mse = {}", fit.mse);
        assert_relative_eq!(fit.homography[(0, 2)], -0.1, epsilon = 0.03);
        assert_relative_eq!(fit.homography[(1, 2)], 0.05, epsilon = 0.03);
    }

    #[test]
    fn test_gradient_points_away_from_boundary_outside() {
        let t = ContourTemplate::create_maps(&circle_points(180, 0.6, Vector2::zeros()), 64);
        // Far right of the circle, outside: gradient x should be positive
        // (distance grows moving further out).
        let p = Vector2::new(60.0, 31.5);
        let g = t.gradient_at(&p);
        assert!(g.x > 0.5, "gradient = {g:?}");
    }
}
