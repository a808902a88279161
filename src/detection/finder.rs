//! Contour extraction from a distance-transform field.
//!
//! Two interchangeable algorithms produce raw fragments: **direct** boundary
//! following walks 8-connected zero-distance pixels; **level-curve**
//! following walks an iso-distance band, propagates fragment ids down to
//! the zero-distance seed pixels referenced by the band's offsets (and to
//! their 4-neighbors), then re-traces the claimed seeds into ordered
//! boundaries. `process` filters the fragments, normalizes the survivors and
//! caps how many it reports.

use std::collections::{HashMap, HashSet};

use nalgebra::Vector2;
use tracing::{debug, warn};

use crate::config::FinderAlgorithm;
use crate::detection::contour::Contour;
use crate::detection::{
    MAX_CONTOUR_CANDIDATES, MAX_CONTOUR_FRAGMENTS, MAX_CONTOUR_LEN, MIN_CONTOUR_LEN,
};
use crate::field::DistanceField;
use crate::solver::Workspace;

/// 8-neighborhood, clockwise from east.
const DIRS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Width of the iso-distance band walked by the level-curve finder.
const LEVEL_BAND: f32 = 1.5;

/// Contour extractor; owns the scratch buffers of one detection pass.
pub struct ContourFinder {
    algorithm: FinderAlgorithm,
    level: f32,
    workspace: Workspace,
}

struct Trace {
    points: Vec<(i64, i64)>,
    closed: bool,
}

impl ContourFinder {
    pub fn new(algorithm: FinderAlgorithm, level: f32) -> Self {
        Self {
            algorithm,
            level,
            workspace: Workspace::new(),
        }
    }

    /// Extract, filter and normalize contours from one field.
    pub fn process(&mut self, field: &DistanceField) -> Vec<Contour> {
        let raw = match self.algorithm {
            FinderAlgorithm::Direct => trace_direct(field),
            FinderAlgorithm::LevelCurve => trace_level_curve(field, self.level),
        };
        debug!(fragments = raw.len(), "traced contour fragments");

        let mut contours = Vec::new();
        for c in raw {
            if let Some(valid) = self.validate(c, field) {
                if contours.len() >= MAX_CONTOUR_CANDIDATES {
                    warn!("contour candidate capacity reached, dropping remainder");
                    break;
                }
                contours.push(valid);
            }
        }
        debug!(contours = contours.len(), "valid contours");
        contours
    }

    /// Filter one fragment; normalize it when it survives.
    fn validate(&mut self, mut contour: Contour, field: &DistanceField) -> Option<Contour> {
        if !contour.closed {
            return None;
        }
        if contour.len() < MIN_CONTOUR_LEN || contour.len() >= MAX_CONTOUR_LEN {
            return None;
        }
        contour.compute_stats();

        let (w, h) = (field.width() as f64, field.height() as f64);
        // Border pixels are pre-seeded negative, so a fragment reaching them
        // was clipped by the frame.
        if contour.bbox_min.x <= 1.0
            || contour.bbox_min.y <= 1.0
            || contour.bbox_max.x >= w - 2.0
            || contour.bbox_max.y >= h - 2.0
        {
            return None;
        }

        let size = contour.bbox_max - contour.bbox_min;
        if size.x > 0.75 * w || size.y > 0.75 * h || size.x * size.y > 0.5 * w * h {
            return None;
        }
        if size.x < 16.0 || size.y < 16.0 {
            return None;
        }

        contour.normalize(&mut self.workspace);
        Some(contour)
    }
}

/// Moore-neighbor walk over pixels satisfying `on`, starting at `start`
/// (assumed found by raster scan, so entered from the west).
fn trace<F: Fn(i64, i64) -> bool>(start: (i64, i64), on: F) -> Trace {
    let mut points = vec![start];
    let mut cur = start;
    let mut prev_dir = 0usize; // pretend we arrived moving east

    loop {
        let backtrack = (prev_dir + 4) % 8;
        let mut step = None;
        for k in 1..=8 {
            let d = (backtrack + k) % 8;
            let next = (cur.0 + DIRS[d].0, cur.1 + DIRS[d].1);
            if on(next.0, next.1) {
                step = Some((d, next));
                break;
            }
        }
        match step {
            None => return Trace { points, closed: false },
            Some((d, next)) => {
                if next == start && points.len() >= 3 {
                    return Trace { points, closed: true };
                }
                if points.len() >= MAX_CONTOUR_LEN {
                    // Saturated; rejected downstream by the length filter.
                    return Trace { points, closed: false };
                }
                points.push(next);
                cur = next;
                prev_dir = d;
            }
        }
    }
}

fn to_contour(t: Trace) -> Contour {
    let points = t
        .points
        .into_iter()
        .map(|(x, y)| Vector2::new(x as f64, y as f64))
        .collect();
    Contour::new(points, t.closed)
}

/// Direct boundary following along zero-distance pixels.
fn trace_direct(field: &DistanceField) -> Vec<Contour> {
    let (w, h) = (field.width() as i64, field.height() as i64);
    let mut visited = vec![false; (w * h) as usize];
    let mut contours = Vec::new();

    let is_edge = |x: i64, y: i64| {
        field.contains(x, y) && field.distance(x as usize, y as usize) == 0.0
    };

    for y in 0..h {
        for x in 0..w {
            if !is_edge(x, y) || visited[(y * w + x) as usize] {
                continue;
            }
            if contours.len() >= MAX_CONTOUR_FRAGMENTS {
                warn!("contour fragment capacity reached, dropping remainder");
                return contours;
            }
            let t = trace((x, y), is_edge);
            for &(px, py) in &t.points {
                visited[(py * w + px) as usize] = true;
            }
            contours.push(to_contour(t));
        }
    }
    contours
}

/// Level-curve following: walk the iso-distance band at `level`, claiming
/// the zero-distance seed pixel of every band pixel together with the seed's
/// 4-neighborhood. When a walk reaches a seed claimed by an earlier
/// fragment, it restarts under that fragment's id so both band arcs merge.
/// Each merged seed set is then re-traced from its raster-first pixel into a
/// single ordered boundary sequence.
fn trace_level_curve(field: &DistanceField, level: f32) -> Vec<Contour> {
    let (w, h) = (field.width() as i64, field.height() as i64);
    let mut band_visited = vec![false; (w * h) as usize];
    let mut seed_ids: HashMap<(i64, i64), usize> = HashMap::new();
    let mut members: HashMap<usize, HashSet<(i64, i64)>> = HashMap::new();
    let mut next_id = 0usize;

    let in_band = |x: i64, y: i64| {
        if !field.contains(x, y) {
            return false;
        }
        let d = field.distance(x as usize, y as usize);
        d >= level && d < level + LEVEL_BAND
    };

    'scan: for y in 0..h {
        for x in 0..w {
            if !in_band(x, y) || band_visited[(y * w + x) as usize] {
                continue;
            }
            if members.len() >= MAX_CONTOUR_FRAGMENTS {
                warn!("contour fragment capacity reached, dropping remainder");
                break 'scan;
            }

            // The walk itself does not depend on the id; conflicts only
            // change which id ends up claiming its seeds.
            let walk = trace((x, y), in_band);
            for &(px, py) in &walk.points {
                band_visited[(py * w + px) as usize] = true;
            }

            let mut id = next_id;
            let mut retries = 0;
            let seeds = loop {
                match collect_seeds(field, &walk, id, &seed_ids) {
                    Ok(seeds) => break seeds,
                    Err(owner) if retries < 4 => {
                        // Most recently discovered id wins the merge target.
                        id = owner;
                        retries += 1;
                    }
                    Err(_) => break Vec::new(),
                }
            };
            if seeds.is_empty() {
                continue;
            }

            let set = members.entry(id).or_default();
            for &s in &seeds {
                seed_ids.insert(s, id);
                set.insert(s);
                for n in [
                    (s.0 + 1, s.1),
                    (s.0 - 1, s.1),
                    (s.0, s.1 + 1),
                    (s.0, s.1 - 1),
                ] {
                    seed_ids.entry(n).or_insert(id);
                }
            }
            if id == next_id {
                next_id += 1;
            }
        }
    }

    // Re-trace each claimed seed set so the merged fragment traverses the
    // boundary once, in order, independent of the band walks that found it.
    let mut ids: Vec<usize> = members.keys().copied().collect();
    ids.sort_unstable();
    ids.into_iter()
        .map(|id| {
            let set = &members[&id];
            let start = *set.iter().min_by_key(|&&(x, y)| (y, x)).unwrap();
            to_contour(trace(start, |x, y| set.contains(&(x, y))))
        })
        .collect()
}

/// Seed pixels of one band walk, deduplicating consecutive repeats.
///
/// Fails with the owning id when a seed is already claimed by another
/// fragment; claims cover each seed's 4-neighborhood, so near-miss offsets
/// still merge.
fn collect_seeds(
    field: &DistanceField,
    t: &Trace,
    id: usize,
    seed_ids: &HashMap<(i64, i64), usize>,
) -> Result<Vec<(i64, i64)>, usize> {
    let mut seeds: Vec<(i64, i64)> = Vec::new();
    for &(x, y) in &t.points {
        let px = field.get(x as usize, y as usize);
        let seed = (x - px.offset.0 as i64, y - px.offset.1 as i64);
        if !field.contains(seed.0, seed.1) {
            continue;
        }
        if let Some(&owner) = seed_ids.get(&seed) {
            if owner != id {
                return Err(owner);
            }
        }
        if seeds.last() != Some(&seed) {
            seeds.push(seed);
        }
    }
    Ok(seeds)
}
