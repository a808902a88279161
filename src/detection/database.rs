//! The learned contour-class database: per contour-type class lists,
//! training insertion and classification lookup.

use nalgebra::{Matrix3, Point3, Vector2, Vector3};
use tracing::{debug, info};

use crate::camera::Pose;
use crate::config::{CameraMetrics, TrainingParams};
use crate::detection::class::ContourClass;
use crate::detection::contour::Contour;
use crate::detection::ferns::{ContourPatch, FernTests};
use crate::detection::template::ContourTemplate;
use crate::error::{EdgetrackError, Result};
use crate::field::DistanceField;
use crate::solver::Workspace;

/// Homography fits with |det| below this are never trusted during training.
const MIN_TRAINING_DET: f64 = 1e-3;

/// Number of classes reported by `best_class_candidates`.
const TOP_CANDIDATES: usize = 3;

/// Outcome of one training insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The contour matched an existing class, whose statistics were updated.
    Matched { contour_type: usize, class: usize },
    /// A new class was spawned for the contour.
    New { contour_type: usize, class: usize },
}

/// A classification candidate from `best_class_candidates`.
#[derive(Debug, Clone, Copy)]
pub struct ClassCandidate {
    pub contour_type: usize,
    pub class: usize,
    pub probability: f64,
}

/// Per contour-type collections of learned classes, plus the imported
/// object-plane contour model the types refer to.
#[derive(Debug)]
pub struct ContourDatabase {
    pub(crate) valid: bool,
    pub(crate) metrics: CameraMetrics,
    pub(crate) training: TrainingParams,
    pub(crate) tests: FernTests,
    /// Object-plane (z = 0) contour points of each model contour type.
    pub(crate) contour_model: Vec<Vec<Vector2<f64>>>,
    pub(crate) classes: Vec<Vec<ContourClass>>,
}

impl ContourDatabase {
    /// One contour type (and class list) per imported model contour.
    pub fn new(
        metrics: CameraMetrics,
        training: TrainingParams,
        contour_model: Vec<Vec<Vector2<f64>>>,
    ) -> Result<Self> {
        training.validate()?;
        let tests = FernTests::generate(
            training.num_ferns,
            training.num_bits,
            training.patch_size,
            training.fern_seed,
        );
        let classes = vec![Vec::new(); contour_model.len()];
        Ok(Self {
            valid: true,
            metrics,
            training,
            tests,
            contour_model,
            classes,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn metrics(&self) -> &CameraMetrics {
        &self.metrics
    }

    pub fn training(&self) -> &TrainingParams {
        &self.training
    }

    pub fn tests(&self) -> &FernTests {
        &self.tests
    }

    pub fn num_types(&self) -> usize {
        self.classes.len()
    }

    pub fn num_classes(&self, contour_type: usize) -> usize {
        self.classes[contour_type].len()
    }

    /// Object-plane points of one model contour type.
    pub fn contour_model(&self, contour_type: usize) -> &[Vector2<f64>] {
        &self.contour_model[contour_type]
    }

    pub fn class(&self, contour_type: usize, index: usize) -> &ContourClass {
        &self.classes[contour_type][index]
    }

    fn guard(&self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(EdgetrackError::NotValid)
        }
    }

    /// Train on one (contour, pose) observation.
    ///
    /// Finds the best same-type class by homography-fit MSE; updates it when
    /// the area-scaled MSE is inside the warp-error threshold, otherwise
    /// spawns a new class around this contour.
    pub fn insert_contour_pose(
        &mut self,
        field: &DistanceField,
        contour: &Contour,
        pose: &Pose,
        workspace: &mut Workspace,
    ) -> Result<InsertOutcome> {
        self.guard()?;
        if !contour.valid {
            return Err(EdgetrackError::NotValid);
        }
        let contour_type = contour.contour_type;
        let size = self.training.patch_size;
        let area = (size * size) as f64;

        let patch = ContourPatch::extract(field, contour, size);
        let descriptor = self.tests.descriptor(&patch);
        let intrinsics = pose.intrinsics(&self.metrics);
        let transform = contour.normalization * intrinsics * plane_pose(pose);
        let normalized = contour.normalized_points();

        let mut best: Option<(usize, crate::detection::template::HomographyFit)> = None;
        for (i, class) in self.classes[contour_type].iter().enumerate() {
            let fit = class.template.match_contour(&normalized, workspace);
            if fit.det.abs() < MIN_TRAINING_DET {
                continue;
            }
            if best.as_ref().map_or(true, |(_, b)| fit.mse < b.mse) {
                best = Some((i, fit));
            }
        }

        if let Some((index, fit)) = best {
            let scaled = fit.mse / area;
            if scaled < self.training.warp_error_threshold {
                let ambiguity = self.pose_difference(contour, &fit.homography, pose, index);
                self.classes[contour_type][index].increment(&descriptor, scaled, ambiguity);
                debug!(contour_type, class = index, scaled, "matched existing class");
                return Ok(InsertOutcome::Matched {
                    contour_type,
                    class: index,
                });
            }
        }

        let template = ContourTemplate::create_maps(&normalized, size);
        let mut class = ContourClass::new(
            template,
            transform,
            self.training.num_ferns,
            self.training.num_bits,
        );
        class.increment(&descriptor, 0.0, 0.0);
        self.classes[contour_type].push(class);
        let index = self.classes[contour_type].len() - 1;
        info!(contour_type, class = index, "spawned contour class");
        Ok(InsertOutcome::New {
            contour_type,
            class: index,
        })
    }

    /// 4-corner pose-difference metric: reproject canonical object-plane
    /// corners under the reconstructed and the true pose and average the
    /// pixel deltas.
    fn pose_difference(
        &self,
        contour: &Contour,
        homography: &Matrix3<f64>,
        truth: &Pose,
        class_index: usize,
    ) -> f64 {
        let intrinsics = truth.intrinsics(&self.metrics);
        let class = &self.classes[contour.contour_type][class_index];
        let recon = match class.reconstruct(homography, &contour.normalization, &intrinsics) {
            Some(r) => r,
            None => return f64::MAX,
        };
        let reconstructed =
            Pose::from_rotation_translation(&recon.rotation, &recon.translation, truth.focal);

        let mvp_truth = truth.view_projection(&self.metrics);
        let mvp_recon = reconstructed.view_projection(&self.metrics);
        let corners = [
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(-1.0, 1.0, 0.0),
        ];
        let mut sum = 0.0;
        for c in &corners {
            let a: Vector2<f64> = Pose::project_point(&mvp_truth, c);
            let b: Vector2<f64> = Pose::project_point(&mvp_recon, c);
            sum += (a - b).norm();
        }
        sum / corners.len() as f64
    }

    /// Top classes across all types by descriptor probability.
    pub fn best_class_candidates(
        &self,
        field: &DistanceField,
        contour: &Contour,
    ) -> Result<Vec<ClassCandidate>> {
        self.guard()?;
        let patch = ContourPatch::extract(field, contour, self.training.patch_size);
        let descriptor = self.tests.descriptor(&patch);

        let mut candidates = Vec::new();
        for (t, classes) in self.classes.iter().enumerate() {
            for (i, class) in classes.iter().enumerate() {
                candidates.push(ClassCandidate {
                    contour_type: t,
                    class: i,
                    probability: class.probability(&descriptor),
                });
            }
        }
        candidates.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        candidates.truncate(TOP_CANDIDATES);
        Ok(candidates)
    }
}

/// Planar pose matrix `[r1 r2 t]`: drops the rotation's third column since
/// model contours live in the z = 0 object plane.
fn plane_pose(pose: &Pose) -> Matrix3<f64> {
    let r = pose.rotation_matrix();
    let t: Vector3<f64> = pose.translation;
    Matrix3::from_columns(&[r.column(0).into(), r.column(1).into(), t])
}
