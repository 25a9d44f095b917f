//! Rigid transform with optional 6x6 covariance.
//!
//! The covariance is over the left-perturbation twist, ordered rotation
//! first: `[rx, ry, rz, tx, ty, tz]`. Composition transports the second
//! operand's covariance through the adjoint of the first:
//!
//! ```text
//! P = P1 + Ad(T1) * P2 * Ad(T1)^T
//! ```
//!
//! Composing two transforms that both carry no covariance takes a fast path
//! that performs no 6x6 arithmetic at all.

use serde::{Deserialize, Serialize};

use super::math::{mat3_mul, mat6_add, mat6_sandwich, skew, Mat6, MAT6_ZERO};
use super::transform::Transform;

/// Covariance matrix of a transform, row-major 6x6 over
/// `[rotation; translation]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Covariance {
    data: Mat6,
}

// serde stops at arrays of 32; (de)serialize the 36 values as a sequence.
impl Serialize for Covariance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.data.iter())
    }
}

impl<'de> Deserialize<'de> for Covariance {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let values = Vec::<f64>::deserialize(deserializer)?;
        if values.len() != 36 {
            return Err(serde::de::Error::invalid_length(
                values.len(),
                &"36 covariance values",
            ));
        }
        let mut data = MAT6_ZERO;
        data.copy_from_slice(&values);
        Ok(Self { data })
    }
}

impl Covariance {
    /// All-zero covariance (a certain transform, stated explicitly).
    #[inline]
    pub fn zero() -> Self {
        Self { data: MAT6_ZERO }
    }

    /// Diagonal covariance from six variances, rotation first.
    pub fn diagonal(rot: [f64; 3], trans: [f64; 3]) -> Self {
        let mut data = MAT6_ZERO;
        for i in 0..3 {
            data[i * 6 + i] = rot[i];
            data[(i + 3) * 6 + (i + 3)] = trans[i];
        }
        Self { data }
    }

    /// Build from a row-major 6x6 array.
    #[inline]
    pub fn from_array(data: Mat6) -> Self {
        Self { data }
    }

    /// Raw row-major data.
    #[inline]
    pub fn as_array(&self) -> &Mat6 {
        &self.data
    }
}

impl Default for Covariance {
    fn default() -> Self {
        Self::zero()
    }
}

/// A rigid transform plus optional uncertainty.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TransformWithUncertainty {
    /// The mean transform.
    pub transform: Transform,
    /// Covariance, absent for exactly known transforms.
    pub covariance: Option<Covariance>,
}

impl TransformWithUncertainty {
    /// The identity transform with no uncertainty.
    #[inline]
    pub fn identity() -> Self {
        Self {
            transform: Transform::identity(),
            covariance: None,
        }
    }

    /// An exactly known transform.
    #[inline]
    pub fn certain(transform: Transform) -> Self {
        Self {
            transform,
            covariance: None,
        }
    }

    /// A transform with covariance.
    #[inline]
    pub fn with_covariance(transform: Transform, covariance: Covariance) -> Self {
        Self {
            transform,
            covariance: Some(covariance),
        }
    }

    /// True when a covariance is attached.
    #[inline]
    pub fn has_uncertainty(&self) -> bool {
        self.covariance.is_some()
    }

    /// SE(3) adjoint of a transform, used to transport twists (and hence
    /// covariance) between frames.
    fn adjoint(t: &Transform) -> Mat6 {
        let r = t.rotation.to_matrix();
        let tr = mat3_mul(&skew(t.translation), &r);
        let mut a = MAT6_ZERO;
        for i in 0..3 {
            for j in 0..3 {
                a[i * 6 + j] = r[i * 3 + j];
                a[(i + 3) * 6 + j] = tr[i * 3 + j];
                a[(i + 3) * 6 + (j + 3)] = r[i * 3 + j];
            }
        }
        a
    }

    /// Compose `self * other`, propagating covariance linearized through the
    /// adjoint. Composition of two certain transforms skips the covariance
    /// math entirely.
    pub fn compose(&self, other: &TransformWithUncertainty) -> TransformWithUncertainty {
        let transform = self.transform.compose(&other.transform);
        let covariance = match (&self.covariance, &other.covariance) {
            (None, None) => None,
            (own, theirs) => {
                let mut p = own.map(|c| c.data).unwrap_or(MAT6_ZERO);
                if let Some(c2) = theirs {
                    let ad = Self::adjoint(&self.transform);
                    p = mat6_add(&p, &mat6_sandwich(&ad, &c2.data));
                }
                Some(Covariance { data: p })
            }
        };
        TransformWithUncertainty {
            transform,
            covariance,
        }
    }

    /// Inverse transform with covariance transported through the adjoint of
    /// the inverse.
    pub fn inverse(&self) -> TransformWithUncertainty {
        let inv = self.transform.inverse();
        let covariance = self.covariance.map(|c| {
            let ad = Self::adjoint(&inv);
            Covariance {
                data: mat6_sandwich(&ad, &c.data),
            }
        });
        TransformWithUncertainty {
            transform: inv,
            covariance,
        }
    }
}

impl From<Transform> for TransformWithUncertainty {
    fn from(transform: Transform) -> Self {
        Self::certain(transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Quaternion;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_certain_fast_path() {
        let a = TransformWithUncertainty::certain(Transform::from_translation([1.0, 0.0, 0.0]));
        let b = TransformWithUncertainty::certain(Transform::from_translation([0.0, 2.0, 0.0]));
        let c = a.compose(&b);
        assert!(!c.has_uncertainty());
        assert!((c.transform.translation[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_covariance_accumulates() {
        let cov = Covariance::diagonal([0.0; 3], [0.01, 0.02, 0.03]);
        let a = TransformWithUncertainty::with_covariance(Transform::identity(), cov);
        let b = TransformWithUncertainty::with_covariance(Transform::identity(), cov);
        let c = a.compose(&b);
        let p = c.covariance.expect("covariance must survive composition");
        // Identity adjoint: variances add.
        assert!((p.as_array()[3 * 6 + 3] - 0.02).abs() < 1e-12);
        assert!((p.as_array()[5 * 6 + 5] - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_covariance_rotated_by_adjoint() {
        // Translation variance along X, composed behind a 90 degree yaw,
        // must show up along Y in the parent frame.
        let yaw = TransformWithUncertainty::certain(Transform::new(
            Quaternion::from_axis_angle([0.0, 0.0, 1.0], FRAC_PI_2),
            [0.0; 3],
        ));
        let noisy = TransformWithUncertainty::with_covariance(
            Transform::identity(),
            Covariance::diagonal([0.0; 3], [0.04, 0.0, 0.0]),
        );
        let c = yaw.compose(&noisy);
        let p = c.covariance.unwrap();
        assert!((p.as_array()[3 * 6 + 3]).abs() < 1e-12);
        assert!((p.as_array()[4 * 6 + 4] - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_one_sided_uncertainty_survives() {
        let cov = Covariance::diagonal([0.1, 0.1, 0.1], [0.0; 3]);
        let a = TransformWithUncertainty::with_covariance(Transform::identity(), cov);
        let b = TransformWithUncertainty::certain(Transform::from_translation([1.0, 0.0, 0.0]));
        assert!(a.compose(&b).has_uncertainty());
        assert!(b.compose(&a).has_uncertainty());
    }
}
