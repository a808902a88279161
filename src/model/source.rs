//! Model geometry sources.
//!
//! Geometry is generated once by a variant and consumed uniformly afterward;
//! there is no virtual dispatch past model load.

use nalgebra::{Point3, Vector3};

use crate::model::types::Edge;

/// Where the wireframe edges come from.
#[derive(Debug, Clone)]
pub enum ModelGeometrySource {
    /// Axis-aligned box centered at the origin.
    Box { extents: Vector3<f64> },
    /// Edges imported from an external asset (already in model space).
    Imported { edges: Vec<ImportedEdge> },
    /// Union of several sources.
    Composite(Vec<ModelGeometrySource>),
}

/// One imported edge with optional adjacent face normals.
#[derive(Debug, Clone)]
pub struct ImportedEdge {
    pub a: Point3<f64>,
    pub b: Point3<f64>,
    pub normal_left: Vector3<f64>,
    pub normal_right: Vector3<f64>,
}

impl ModelGeometrySource {
    /// Generate the edge list with the given sampling density.
    pub fn generate(&self, density: f64) -> Vec<Edge> {
        let mut edges = Vec::new();
        self.append(density, &mut edges);
        edges
    }

    fn append(&self, density: f64, out: &mut Vec<Edge>) {
        match self {
            ModelGeometrySource::Box { extents } => append_box(extents, density, out),
            ModelGeometrySource::Imported { edges } => {
                for e in edges {
                    out.push(
                        Edge::new(e.a, e.b, density).with_normals(e.normal_left, e.normal_right),
                    );
                }
            }
            ModelGeometrySource::Composite(sources) => {
                for s in sources {
                    s.append(density, out);
                }
            }
        }
    }
}

fn append_box(extents: &Vector3<f64>, density: f64, out: &mut Vec<Edge>) {
    let h = extents * 0.5;
    let corner = |sx: f64, sy: f64, sz: f64| Point3::new(sx * h.x, sy * h.y, sz * h.z);

    // 8 corners, indexed by sign triples.
    let c = [
        corner(-1.0, -1.0, -1.0),
        corner(1.0, -1.0, -1.0),
        corner(1.0, 1.0, -1.0),
        corner(-1.0, 1.0, -1.0),
        corner(-1.0, -1.0, 1.0),
        corner(1.0, -1.0, 1.0),
        corner(1.0, 1.0, 1.0),
        corner(-1.0, 1.0, 1.0),
    ];

    // Each edge carries the normals of its two adjacent faces.
    let x = Vector3::x();
    let y = Vector3::y();
    let z = Vector3::z();
    let edges: [(usize, usize, Vector3<f64>, Vector3<f64>); 12] = [
        (0, 1, -y, -z),
        (1, 2, x, -z),
        (2, 3, y, -z),
        (3, 0, -x, -z),
        (4, 5, -y, z),
        (5, 6, x, z),
        (6, 7, y, z),
        (7, 4, -x, z),
        (0, 4, -x, -y),
        (1, 5, x, -y),
        (2, 6, x, y),
        (3, 7, -x, y),
    ];

    for (i, j, nl, nr) in edges {
        out.push(Edge::new(c[i], c[j], density).with_normals(nl, nr));
    }
}
