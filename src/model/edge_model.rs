//! The edge model: projection, per-sample candidate bookkeeping, hypothesis
//! selection, outlier marking and the finite-difference pose Jacobian.
//!
//! The model owns fixed-capacity sample slots per edge. Candidate lists are
//! cleared and rebuilt every frame from the batched edge-search results; the
//! residual vector is the signed distance of each selected candidate to its
//! sample along the projected edge normal.

use nalgebra::{DMatrix, DVector, Matrix4, Vector2};
use tracing::debug;

use crate::camera::Pose;
use crate::config::CameraMetrics;
use crate::field::{CandidateObservation, SampleQuery, SampleSearchResult};
use crate::model::source::ModelGeometrySource;
use crate::model::types::{Candidate, Edge, MAX_SAMPLES_PER_EDGE};

/// Near-plane cutoff for projection.
const NEAR_Z: f64 = 0.01;

/// Finite-difference step for translation/rotation generators.
const JACOBIAN_EPS: f64 = 1e-4;

/// Finite-difference step for the focal parameter.
const JACOBIAN_EPS_FOCAL: f64 = 1e-3;

/// 3-D wireframe with per-edge sampling state.
pub struct EdgeModel {
    edges: Vec<Edge>,
    multi_hypothesis: bool,

    /// (edge, slot) per residual row, rebuilt by `calculate_hypothesis`.
    rows: Vec<(usize, usize)>,
    /// Signed distances per row.
    cost: Vec<f64>,
    /// (edge, slot) per issued sample query, in query order.
    query_rows: Vec<(usize, usize)>,
}

impl EdgeModel {
    pub fn from_source(source: &ModelGeometrySource, density: f64, multi_hypothesis: bool) -> Self {
        Self {
            edges: source.generate(density),
            multi_hypothesis,
            rows: Vec::new(),
            cost: Vec::new(),
            query_rows: Vec::new(),
        }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn set_multi_hypothesis(&mut self, multi: bool) {
        self.multi_hypothesis = multi;
    }

    /// Project every edge under `pose`, computing image-space positions and
    /// normals, the camera-space adjacent face normals and visibility.
    pub fn transform(&mut self, pose: &Pose, metrics: &CameraMetrics) {
        let view = pose.view_matrix();
        let mvp = pose.view_projection(metrics);
        let rot = pose.rotation_matrix();

        for edge in &mut self.edges {
            let a_cam = view.transform_point(&edge.a);
            let b_cam = view.transform_point(&edge.b);
            if a_cam.z < NEAR_Z || b_cam.z < NEAR_Z {
                edge.visible = false;
                edge.active_samples = 0;
                continue;
            }

            edge.proj_a = Pose::project_point(&mvp, &edge.a);
            edge.proj_b = Pose::project_point(&mvp, &edge.b);

            let dir = edge.proj_b - edge.proj_a;
            let len = dir.norm();
            if len < 1.0 {
                edge.visible = false;
                edge.active_samples = 0;
                continue;
            }
            edge.image_normal = Vector2::new(-dir.y, dir.x) / len;

            edge.cam_normal_left = rot * edge.normal_left;
            edge.cam_normal_right = rot * edge.normal_right;

            let has_faces = edge.normal_left.norm() > 0.0 || edge.normal_right.norm() > 0.0;
            edge.visible = if has_faces {
                let mid = (a_cam.coords + b_cam.coords) * 0.5;
                let front_l = edge.cam_normal_left.dot(&mid) < 0.0;
                let front_r = edge.cam_normal_right.dot(&mid) < 0.0;
                front_l || front_r
            } else {
                true
            };
            if !edge.visible {
                edge.active_samples = 0;
                continue;
            }

            let wanted = (len * edge.density).ceil() as usize;
            edge.active_samples = wanted.clamp(1, MAX_SAMPLES_PER_EDGE);

            let n = edge.active_samples;
            for slot in 0..MAX_SAMPLES_PER_EDGE {
                let active = slot < n;
                let t = (slot as f64 + 0.5) / n as f64;
                let point = edge.point_at(t);
                let sample = &mut edge.samples[slot];
                sample.active = active;
                if !sample.active {
                    continue;
                }
                sample.point = point;
                sample.position = edge.proj_a + dir * t;
                sample.normal = edge.image_normal;
                sample.depth = a_cam.z + (b_cam.z - a_cam.z) * t;
            }
        }
    }

    /// Queries for the batched edge search, one per active sample.
    pub fn sample_queries(&mut self) -> Vec<SampleQuery> {
        self.query_rows.clear();
        let mut queries = Vec::new();
        for (ei, edge) in self.edges.iter().enumerate() {
            if !edge.visible {
                continue;
            }
            for slot in 0..edge.active_samples {
                let s = &edge.samples[slot];
                queries.push(SampleQuery {
                    position: s.position,
                    normal: s.normal,
                    ref_colors: s.ref_colors,
                    was_present: s.was_present,
                });
                self.query_rows.push((ei, slot));
            }
        }
        queries
    }

    /// (edge, slot) per issued query, in `sample_queries` order.
    pub fn query_slots(&self) -> &[(usize, usize)] {
        &self.query_rows
    }

    /// Clear candidate lists before a new search pass.
    pub fn begin_add_candidates(&mut self) {
        for edge in &mut self.edges {
            for sample in &mut edge.samples {
                sample.candidates.clear();
                sample.hypothesis = None;
            }
        }
    }

    /// Add one search hit to a sample.
    ///
    /// A candidate is valid unless the sample was previously absent and the
    /// candidate has zero color-match.
    pub fn add_candidate(&mut self, edge: usize, slot: usize, obs: &CandidateObservation) {
        let sample = &mut self.edges[edge].samples[slot];
        let delta = obs.position - sample.position;
        let signed = delta.dot(&sample.normal);
        let valid = sample.was_present || obs.color_match > 0.0;
        sample.push_candidate(Candidate {
            position: obs.position,
            response: obs.response,
            color_match: obs.color_match,
            signed_distance: signed,
            abs_distance: signed.abs(),
            valid,
        });
    }

    /// Mark every sample as previously present.
    ///
    /// Called when seeding a fresh pose: without color history the
    /// presence-based candidate validity rule would reject everything on the
    /// first frame.
    pub fn assume_present(&mut self) {
        for edge in &mut self.edges {
            for sample in &mut edge.samples {
                sample.was_present = true;
            }
        }
    }

    /// Update presence flags after all candidates were added.
    pub fn end_add_candidates(&mut self) {
        for edge in &mut self.edges {
            for slot in 0..edge.active_samples {
                let sample = &mut edge.samples[slot];
                sample.was_present = !sample.candidates.is_empty();
            }
        }
    }

    /// Feed a full search-result batch (in `sample_queries` order).
    pub fn apply_search_results(&mut self, results: &[SampleSearchResult]) {
        self.begin_add_candidates();
        let rows = self.query_rows.clone();
        for ((edge, slot), result) in rows.into_iter().zip(results) {
            self.edges[edge].samples[slot].fresh_colors = result.colors;
            for obs in &result.candidates {
                self.add_candidate(edge, slot, obs);
            }
        }
        self.end_add_candidates();
    }

    /// Select one working hypothesis per sample and rebuild the residuals.
    ///
    /// Single-hypothesis picks the candidate with maximum edge response;
    /// multi-hypothesis the one with minimum squared signed distance.
    pub fn calculate_hypothesis(&mut self) {
        for edge in &mut self.edges {
            if !edge.visible {
                continue;
            }
            for slot in 0..edge.active_samples {
                let sample = &mut edge.samples[slot];
                let multi = self.multi_hypothesis;
                let best = sample
                    .candidates
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.valid)
                    .max_by(|(_, a), (_, b)| {
                        if multi {
                            // Minimum squared signed distance.
                            (b.signed_distance * b.signed_distance)
                                .total_cmp(&(a.signed_distance * a.signed_distance))
                        } else {
                            a.response.total_cmp(&b.response)
                        }
                    })
                    .map(|(i, _)| i);
                sample.hypothesis = best;
            }
        }
        self.rebuild_cost();
    }

    fn rebuild_cost(&mut self) {
        self.rows.clear();
        self.cost.clear();
        for (ei, edge) in self.edges.iter().enumerate() {
            if !edge.visible {
                continue;
            }
            for slot in 0..edge.active_samples {
                let sample = &edge.samples[slot];
                if !sample.inlier {
                    continue;
                }
                if let Some(c) = sample.hypothesis_candidate() {
                    self.rows.push((ei, slot));
                    self.cost.push(c.signed_distance);
                }
            }
        }
    }

    /// Reclassify samples: inlier iff |signed distance| < `limit`.
    pub fn mark_outliers(&mut self, limit: f64) {
        let mut inliers = 0usize;
        let mut total = 0usize;
        for edge in &mut self.edges {
            if !edge.visible {
                continue;
            }
            for slot in 0..edge.active_samples {
                let sample = &mut edge.samples[slot];
                let signed = match sample.hypothesis_candidate() {
                    Some(c) => c.signed_distance,
                    None => continue,
                };
                total += 1;
                sample.inlier = signed.abs() < limit;
                if sample.inlier {
                    inliers += 1;
                }
            }
        }
        debug!(limit, inliers, total, "marked outliers");
        self.rebuild_cost();
    }

    /// Reclassify samples against a refined pose: inlier iff the signed
    /// distance from the reprojected sample point to its candidate is below
    /// `limit` in magnitude.
    pub fn mark_outliers_for_pose(&mut self, pose: &Pose, metrics: &CameraMetrics, limit: f64) {
        let mvp = pose.view_projection(metrics);
        for edge in &mut self.edges {
            if !edge.visible {
                continue;
            }
            for slot in 0..edge.active_samples {
                let sample = &mut edge.samples[slot];
                let cand_position = match sample.hypothesis_candidate() {
                    Some(c) => c.position,
                    None => continue,
                };
                let proj = Pose::project_point(&mvp, &sample.point);
                let r = (cand_position - proj).dot(&sample.normal);
                sample.inlier = r.abs() < limit;
            }
        }
        self.rebuild_cost();
    }

    /// Reset every sample to inlier.
    pub fn reset_inliers(&mut self) {
        for edge in &mut self.edges {
            for sample in &mut edge.samples {
                sample.inlier = true;
            }
        }
    }

    /// Number of samples contributing residuals.
    pub fn working_sample_count(&self) -> usize {
        self.rows.len()
    }

    /// Signed distances of the working samples.
    pub fn residuals(&self) -> &[f64] {
        &self.cost
    }

    /// Absolute distances of the working samples.
    pub fn distances(&self) -> Vec<f64> {
        self.cost.iter().map(|d| d.abs()).collect()
    }

    /// Residuals of the working samples under a different pose: the signed
    /// distance from the reprojected sample point to its selected candidate
    /// along the (frozen) edge normal.
    pub fn residuals_for_pose(&self, pose: &Pose, metrics: &CameraMetrics, out: &mut DVector<f64>) {
        let mvp = pose.view_projection(metrics);
        self.residuals_for_mvp(&mvp, out);
    }

    fn residuals_for_mvp(&self, mvp: &Matrix4<f64>, out: &mut DVector<f64>) {
        for (row, &(ei, slot)) in self.rows.iter().enumerate() {
            let sample = &self.edges[ei].samples[slot];
            // Hypothesis exists for every row by construction.
            let cand = sample.hypothesis_candidate().unwrap();
            let proj = Pose::project_point(mvp, &sample.point);
            out[row] = (cand.position - proj).dot(&sample.normal);
        }
    }

    /// Finite-difference Jacobian of the residual vector: one column per
    /// pose generator (3 translation axes, 3 rotation axes, optionally the
    /// focal length).
    pub fn update_jacobian(
        &self,
        pose: &Pose,
        metrics: &CameraMetrics,
        optimize_focal: bool,
        out: &mut DMatrix<f64>,
    ) {
        let n = self.rows.len();
        let num_params = if optimize_focal { 7 } else { 6 };
        debug_assert_eq!(out.shape(), (n, num_params));

        let mut base = DVector::zeros(n);
        self.residuals_for_pose(pose, metrics, &mut base);
        let mut perturbed = DVector::zeros(n);

        let base_vec = pose.as_vector();
        for k in 0..num_params {
            let eps = if k == 6 { JACOBIAN_EPS_FOCAL } else { JACOBIAN_EPS };
            let mut v = base_vec;
            v[k] += eps;
            let p = Pose::from_vector(&v);
            self.residuals_for_pose(&p, metrics, &mut perturbed);
            for row in 0..n {
                out[(row, k)] = (perturbed[row] - base[row]) / eps;
            }
        }
    }

    /// Reset reference colors from the freshly observed side colors.
    pub fn reset_ref_colors(&mut self) {
        for edge in &mut self.edges {
            for sample in &mut edge.samples {
                sample.ref_colors = sample.fresh_colors;
            }
        }
    }

    /// Blend fresh side colors into the reference model.
    pub fn adapt_ref_colors(&mut self, adaptability: f64) {
        let a = adaptability.clamp(0.0, 1.0);
        for edge in &mut self.edges {
            for sample in &mut edge.samples {
                for i in 0..2 {
                    sample.ref_colors[i] =
                        (1.0 - a) * sample.ref_colors[i] + a * sample.fresh_colors[i];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn box_model() -> EdgeModel {
        let source = ModelGeometrySource::Box {
            extents: Vector3::new(1.0, 1.0, 1.0),
        };
        EdgeModel::from_source(&source, 0.2, false)
    }

    fn metrics() -> CameraMetrics {
        CameraMetrics::new(640, 480)
    }

    fn observation(position: Vector2<f64>, response: f64, color_match: f64) -> CandidateObservation {
        CandidateObservation {
            position,
            response,
            color_match,
            colors: [60.0, 180.0],
        }
    }

    #[test]
    fn test_transform_projects_and_culls() {
        let mut model = box_model();
        model.transform(&Pose::default(), &metrics());
        let visible = model.edges().iter().filter(|e| e.visible).count();
        // Front and silhouette edges of a box: never all 12, never none.
        assert!(visible >= 4 && visible < 12, "visible = {visible}");
        for e in model.edges().iter().filter(|e| e.visible) {
            assert_relative_eq!(e.image_normal.norm(), 1.0, epsilon = 1e-9);
            assert!(e.active_samples >= 1);
        }
    }

    #[test]
    fn test_single_hypothesis_picks_max_response() {
        let mut model = box_model();
        model.transform(&Pose::default(), &metrics());
        let queries = model.sample_queries();
        assert!(!queries.is_empty());

        model.begin_add_candidates();
        let (ei, slot) = model.query_rows[0];
        let pos = model.edges()[ei].samples[slot].position;
        let normal = model.edges()[ei].samples[slot].normal;
        model.add_candidate(ei, slot, &observation(pos + normal * 3.0, 0.9, 1.0));
        model.add_candidate(ei, slot, &observation(pos + normal * 1.0, 0.5, 1.0));
        model.end_add_candidates();
        model.calculate_hypothesis();

        let sample = &model.edges()[ei].samples[slot];
        let c = sample.hypothesis_candidate().unwrap();
        assert_relative_eq!(c.signed_distance, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_multi_hypothesis_picks_min_signed_distance() {
        let mut model = box_model();
        model.set_multi_hypothesis(true);
        model.transform(&Pose::default(), &metrics());
        model.sample_queries();

        model.begin_add_candidates();
        let (ei, slot) = model.query_rows[0];
        let pos = model.edges()[ei].samples[slot].position;
        let normal = model.edges()[ei].samples[slot].normal;
        model.add_candidate(ei, slot, &observation(pos + normal * 3.0, 0.9, 1.0));
        model.add_candidate(ei, slot, &observation(pos - normal * 1.0, 0.5, 1.0));
        model.end_add_candidates();
        model.calculate_hypothesis();

        let sample = &model.edges()[ei].samples[slot];
        let c = sample.hypothesis_candidate().unwrap();
        assert_relative_eq!(c.signed_distance, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_absent_sample_with_zero_color_match_is_invalid() {
        let mut model = box_model();
        model.transform(&Pose::default(), &metrics());
        model.sample_queries();

        model.begin_add_candidates();
        let (ei, slot) = model.query_rows[0];
        let pos = model.edges()[ei].samples[slot].position;
        model.add_candidate(ei, slot, &observation(pos, 1.0, 0.0));
        model.end_add_candidates();
        model.calculate_hypothesis();

        assert!(model.edges()[ei].samples[slot].hypothesis.is_none());
    }

    #[test]
    fn test_mark_outliers_monotone_in_limit() {
        let mut model = box_model();
        model.transform(&Pose::default(), &metrics());
        model.sample_queries();

        model.begin_add_candidates();
        let rows = model.query_rows.clone();
        for (i, &(ei, slot)) in rows.iter().enumerate() {
            let pos = model.edges()[ei].samples[slot].position;
            let normal = model.edges()[ei].samples[slot].normal;
            let d = (i % 7) as f64;
            model.add_candidate(ei, slot, &observation(pos + normal * d, 1.0, 1.0));
        }
        model.end_add_candidates();
        model.calculate_hypothesis();

        let mut prev = 0usize;
        for limit in [1.0, 2.0, 4.0, 8.0] {
            model.reset_inliers();
            model.mark_outliers(limit);
            let count = model.working_sample_count();
            assert!(count >= prev, "inlier count decreased at limit {limit}");
            prev = count;
        }
    }

    #[test]
    fn test_jacobian_shape_and_translation_sensitivity() {
        let mut model = box_model();
        let m = metrics();
        let pose = Pose::default();
        model.transform(&pose, &m);
        model.sample_queries();

        model.begin_add_candidates();
        let rows = model.query_rows.clone();
        for &(ei, slot) in &rows {
            let pos = model.edges()[ei].samples[slot].position;
            model.add_candidate(ei, slot, &observation(pos, 1.0, 1.0));
        }
        model.end_add_candidates();
        model.calculate_hypothesis();

        let n = model.working_sample_count();
        let mut jac = DMatrix::zeros(n, 6);
        model.update_jacobian(&pose, &m, false, &mut jac);

        // Moving the model along +x moves projections along +x; residual
        // changes by -normal.x per unit. At least some samples have a
        // horizontal normal component.
        let col = jac.column(0);
        assert!(col.iter().any(|v| v.abs() > 1.0), "tx column all ~zero");
    }
}
