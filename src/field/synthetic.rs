//! CPU reference implementation of the external compute collaborators.
//!
//! Rasterizes a known set of image-space edge segments into an edge mask,
//! derives the distance-transform field by chamfer propagation and answers
//! edge-search queries by scanning the field along sample normals. Used by
//! the tests and the demo binary in place of the GPU pipeline.

use nalgebra::Vector2;

use super::{
    CandidateObservation, DistanceField, EdgeSearch, FrameAnalysis, SampleQuery,
    SampleSearchResult,
};

/// Flat two-tone color model of the synthetic scene.
const INSIDE_COLOR: f64 = 180.0;
const OUTSIDE_COLOR: f64 = 60.0;

/// Synthetic frame: edge segments plus an optional silhouette polygon for
/// the color model.
pub struct SyntheticScene {
    width: usize,
    height: usize,
    segments: Vec<(Vector2<f64>, Vector2<f64>)>,
    silhouette: Vec<Vector2<f64>>,
    field: Option<DistanceField>,
}

impl SyntheticScene {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            segments: Vec::new(),
            silhouette: Vec::new(),
            field: None,
        }
    }

    /// Replace the scene content and invalidate the cached field.
    pub fn set_segments(&mut self, segments: Vec<(Vector2<f64>, Vector2<f64>)>) {
        self.segments = segments;
        self.field = None;
    }

    pub fn set_silhouette(&mut self, polygon: Vec<Vector2<f64>>) {
        self.silhouette = polygon;
    }

    fn rasterize(&self) -> Vec<bool> {
        let mut mask = vec![false; self.width * self.height];
        for (a, b) in &self.segments {
            let len = (b - a).norm();
            let steps = (len.ceil() as usize).max(1) * 2;
            for i in 0..=steps {
                let t = i as f64 / steps as f64;
                let p = a + (b - a) * t;
                let x = p.x.round() as i64;
                let y = p.y.round() as i64;
                if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
                    mask[y as usize * self.width + x as usize] = true;
                }
            }
        }
        mask
    }

    fn ensure_field(&mut self) {
        if self.field.is_none() {
            let mask = self.rasterize();
            self.field = Some(DistanceField::from_edge_mask(&mask, self.width, self.height));
        }
    }

    fn inside_silhouette(&self, p: &Vector2<f64>) -> bool {
        // Even-odd rule over the silhouette polygon.
        let n = self.silhouette.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = &self.silhouette[i];
            let b = &self.silhouette[j];
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

    fn color_at(&self, p: &Vector2<f64>) -> f64 {
        if self.inside_silhouette(p) {
            INSIDE_COLOR
        } else {
            OUTSIDE_COLOR
        }
    }

    /// Colors on either side of `position` along `normal`.
    fn side_colors(&self, position: &Vector2<f64>, normal: &Vector2<f64>) -> [f64; 2] {
        let off = normal * 2.0;
        [self.color_at(&(position - off)), self.color_at(&(position + off))]
    }
}

impl FrameAnalysis for SyntheticScene {
    fn distance_field(&mut self) -> &DistanceField {
        self.ensure_field();
        self.field.as_ref().unwrap()
    }

    fn point_visible(&self, _position: &Vector2<f64>, _depth: f64) -> bool {
        // The synthetic scene has no occluders.
        true
    }
}

impl EdgeSearch for SyntheticScene {
    fn search(
        &mut self,
        queries: &[SampleQuery],
        range: f64,
        color_tolerance: f64,
    ) -> Vec<SampleSearchResult> {
        self.ensure_field();
        let field = self.field.take().unwrap();

        let results = queries
            .iter()
            .map(|q| {
                let mut result = SampleSearchResult {
                    candidates: Vec::new(),
                    colors: self.side_colors(&q.position, &q.normal),
                };

                // Scan the normal for local minima of the distance field.
                let steps = (2.0 * range).ceil() as i64;
                let mut prev = f64::MAX;
                let mut descending = false;
                let mut best_on_descent = (f64::MAX, q.position);
                for i in 0..=steps {
                    let t = -range + i as f64;
                    let p = q.position + q.normal * t;
                    let d = field.distance_at(&p);
                    if d < 0.0 {
                        prev = f64::MAX;
                        continue;
                    }
                    if d < prev {
                        descending = true;
                        if d < best_on_descent.0 {
                            best_on_descent = (d, p);
                        }
                    } else if descending && best_on_descent.0 < 1.5 {
                        result.candidates.push(self.make_candidate(
                            best_on_descent.1,
                            best_on_descent.0,
                            &q.normal,
                            &q.ref_colors,
                            color_tolerance,
                        ));
                        descending = false;
                        best_on_descent = (f64::MAX, p);
                    }
                    prev = d;
                }
                if descending && best_on_descent.0 < 1.5 {
                    result.candidates.push(self.make_candidate(
                        best_on_descent.1,
                        best_on_descent.0,
                        &q.normal,
                        &q.ref_colors,
                        color_tolerance,
                    ));
                }
                result
            })
            .collect();

        self.field = Some(field);
        results
    }
}

impl SyntheticScene {
    fn make_candidate(
        &self,
        position: Vector2<f64>,
        distance: f64,
        normal: &Vector2<f64>,
        ref_colors: &[f64; 2],
        tolerance: f64,
    ) -> CandidateObservation {
        let colors = self.side_colors(&position, normal);
        let color_dist =
            0.5 * ((colors[0] - ref_colors[0]).abs() + (colors[1] - ref_colors[1]).abs());
        let color_match = (1.0 - color_dist / tolerance.max(1e-9)).max(0.0);
        CandidateObservation {
            position,
            response: 1.0 / (1.0 + distance),
            color_match,
            colors,
        }
    }
}
