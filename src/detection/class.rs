//! One learned pose-appearance cluster: template maps, the founding
//! transform, the ferns frequency table and running quality statistics.

use nalgebra::{Matrix3, Vector3};

use crate::detection::template::ContourTemplate;

/// Pose pieces recovered from a homography decomposition.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Deviation of the raw basis-column angle from 90° (radians); large
    /// values mean an unreliable decomposition.
    pub angle_deviation: f64,
}

/// One learned contour class. Owned exclusively by the database.
#[derive(Debug, Clone)]
pub struct ContourClass {
    pub(crate) template: ContourTemplate,
    /// Founding transform `A = N · K · [r1 r2 t]`: object-plane points to
    /// the founding contour's normalized frame.
    pub(crate) transform: Matrix3<f64>,
    /// `num_ferns × 2^num_bits` observation counts.
    pub(crate) frequencies: Vec<u32>,
    /// Total increments (the frequency normalizer).
    pub(crate) class_count: u64,
    pub(crate) accuracy_sum: f64,
    pub(crate) ambiguity_sum: f64,
    pub(crate) samples: u64,
    pub(crate) num_bits: usize,
}

impl ContourClass {
    pub fn new(
        template: ContourTemplate,
        transform: Matrix3<f64>,
        num_ferns: usize,
        num_bits: usize,
    ) -> Self {
        Self {
            template,
            transform,
            frequencies: vec![0; num_ferns << num_bits],
            class_count: 0,
            accuracy_sum: 0.0,
            ambiguity_sum: 0.0,
            samples: 0,
            num_bits,
        }
    }

    pub fn template(&self) -> &ContourTemplate {
        &self.template
    }

    pub fn transform(&self) -> &Matrix3<f64> {
        &self.transform
    }

    /// Smoothed naive-Bayes probability of a descriptor under this class:
    /// `∏_f (freq[f,code]+1) / (count + 2^bits)`.
    pub fn probability(&self, descriptor: &[u32]) -> f64 {
        let denom = self.class_count as f64 + (1u64 << self.num_bits) as f64;
        descriptor
            .iter()
            .enumerate()
            .map(|(f, &code)| {
                let freq = self.frequencies[(f << self.num_bits) + code as usize];
                (freq as f64 + 1.0) / denom
            })
            .product()
    }

    /// Accumulate one training observation.
    pub fn increment(&mut self, descriptor: &[u32], mse: f64, ambiguity: f64) {
        for (f, &code) in descriptor.iter().enumerate() {
            self.frequencies[(f << self.num_bits) + code as usize] += 1;
        }
        self.class_count += 1;
        self.accuracy_sum += mse;
        self.ambiguity_sum += ambiguity;
        self.samples += 1;
    }

    /// Mean homography-fit MSE across training observations (lower = better).
    pub fn fitting_accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.accuracy_sum / self.samples as f64
        }
    }

    /// Mean pose-difference metric across training observations (lower =
    /// more reliable).
    pub fn pose_ambiguity(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.ambiguity_sum / self.samples as f64
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    /// Decompose a fitted homography into a pose.
    ///
    /// `M = K⁻¹ · N_q⁻¹ · H⁻¹ · A` maps object-plane points to camera rays;
    /// its first two columns are averaged/orthonormalized into a rotation
    /// basis (handling the two-fold ambiguity by enforcing orthogonality),
    /// the third is the translation.
    pub fn reconstruct(
        &self,
        homography: &Matrix3<f64>,
        query_normalization: &Matrix3<f64>,
        intrinsics: &Matrix3<f64>,
    ) -> Option<Reconstruction> {
        let h_inv = homography.try_inverse()?;
        let nq_inv = query_normalization.try_inverse()?;
        let k_inv = intrinsics.try_inverse()?;
        let m = k_inv * nq_inv * h_inv * self.transform;

        let m1: Vector3<f64> = m.column(0).into();
        let m2: Vector3<f64> = m.column(1).into();
        let m3: Vector3<f64> = m.column(2).into();
        let norms = m1.norm() + m2.norm();
        if norms < 1e-12 {
            return None;
        }
        let mut scale = 2.0 / norms;
        // The object must sit in front of the camera.
        if m3.z * scale < 0.0 {
            scale = -scale;
        }
        let r1 = m1 * scale;
        let r2 = m2 * scale;
        let translation = m3 * scale;

        let angle = r1.normalize().dot(&r2.normalize()).clamp(-1.0, 1.0).acos();
        let angle_deviation = (angle - std::f64::consts::FRAC_PI_2).abs();

        // Orthonormalize via the (orthogonal) sum and difference directions.
        let u = (r1 + r2).normalize();
        let v = (r1 - r2).normalize();
        let sqrt2_inv = std::f64::consts::FRAC_1_SQRT_2;
        let c1 = (u + v) * sqrt2_inv;
        let c2 = (u - v) * sqrt2_inv;
        let c3 = c1.cross(&c2);
        let rotation = Matrix3::from_columns(&[c1, c2, c3]);

        Some(Reconstruction {
            rotation,
            translation,
            angle_deviation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn empty_class(num_ferns: usize, num_bits: usize) -> ContourClass {
        ContourClass::new(
            ContourTemplate::from_parts(4, vec![0.0; 16], vec![(0.0, 0.0); 16]),
            Matrix3::identity(),
            num_ferns,
            num_bits,
        )
    }

    #[test]
    fn test_probability_in_unit_interval() {
        let mut class = empty_class(4, 6);
        let descriptor = vec![3u32, 17, 0, 63];
        let p0 = class.probability(&descriptor);
        assert!(p0 > 0.0 && p0 <= 1.0);

        for _ in 0..50 {
            class.increment(&descriptor, 0.01, 0.1);
            let p = class.probability(&descriptor);
            assert!(p > 0.0 && p <= 1.0);
        }
    }

    #[test]
    fn test_probability_non_decreasing_for_observed_descriptor() {
        let mut class = empty_class(4, 6);
        let descriptor = vec![5u32, 5, 5, 5];
        let mut prev = class.probability(&descriptor);
        for _ in 0..20 {
            class.increment(&descriptor, 0.0, 0.0);
            let p = class.probability(&descriptor);
            assert!(p >= prev, "probability decreased: {p} < {prev}");
            prev = p;
        }
    }

    #[test]
    fn test_running_statistics() {
        let mut class = empty_class(2, 4);
        class.increment(&[1, 2], 0.2, 1.0);
        class.increment(&[1, 2], 0.4, 3.0);
        assert_relative_eq!(class.fitting_accuracy(), 0.3);
        assert_relative_eq!(class.pose_ambiguity(), 2.0);
        assert_eq!(class.sample_count(), 2);
    }

    #[test]
    fn test_reconstruct_identity_round_trip() {
        // With A = N·K·[r1 r2 t] and H = I, N_q = N, the decomposition must
        // return exactly the pose baked into A.
        let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
        let n = Matrix3::new(0.05, 0.0, -16.0, 0.0, 0.05, -12.0, 0.0, 0.0, 1.0);
        let r = nalgebra::Rotation3::from_euler_angles(0.1, -0.2, 0.3);
        let t = Vector3::new(0.4, -0.2, 5.0);
        let rt = Matrix3::from_columns(&[
            r.matrix().column(0).into(),
            r.matrix().column(1).into(),
            t,
        ]);
        let a = n * k * rt;

        let class = ContourClass::new(
            ContourTemplate::from_parts(4, vec![0.0; 16], vec![(0.0, 0.0); 16]),
            a,
            2,
            4,
        );
        let recon = class
            .reconstruct(&Matrix3::identity(), &n, &k)
            .expect("decomposition");

        assert_relative_eq!(recon.translation, t, epsilon = 1e-9);
        assert!(recon.angle_deviation < 1e-9);
        for i in 0..3 {
            for j in 0..2 {
                assert_relative_eq!(recon.rotation[(i, j)], r.matrix()[(i, j)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_reconstruct_rejects_singular_homography() {
        let class = empty_class(2, 4);
        let singular = Matrix3::zeros();
        assert!(class
            .reconstruct(&singular, &Matrix3::identity(), &Matrix3::identity())
            .is_none());
    }
}
