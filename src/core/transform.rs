//! Rigid 3D transform between coordinate frames.

use serde::{Deserialize, Serialize};

use super::math::{Mat3, Quaternion, Vec3};

/// A rigid 3D transform: rotation followed by translation.
///
/// A frame node stores the transform from its own frame into its parent
/// frame, so `apply` maps child coordinates to parent coordinates.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Transform {
    /// Rotation part as a unit quaternion.
    pub rotation: Quaternion,
    /// Translation part in meters.
    pub translation: Vec3,
}

impl Transform {
    /// The identity transform.
    #[inline]
    pub const fn identity() -> Self {
        Self {
            rotation: Quaternion::identity(),
            translation: [0.0; 3],
        }
    }

    /// Pure translation.
    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            rotation: Quaternion::identity(),
            translation,
        }
    }

    /// Build from rotation and translation parts.
    #[inline]
    pub fn new(rotation: Quaternion, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn apply(&self, p: Vec3) -> Vec3 {
        let r = self.rotation.rotate(p);
        [
            r[0] + self.translation[0],
            r[1] + self.translation[1],
            r[2] + self.translation[2],
        ]
    }

    /// Compose two transforms: `self * other` applies `other` first.
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            rotation: self.rotation.mul(&other.rotation).normalized(),
            translation: self.apply(other.translation),
        }
    }

    /// Inverse transform.
    pub fn inverse(&self) -> Transform {
        let inv_rot = self.rotation.conjugate();
        let t = inv_rot.rotate(self.translation);
        Transform {
            rotation: inv_rot,
            translation: [-t[0], -t[1], -t[2]],
        }
    }

    /// Rotation part as a row-major 3x3 matrix.
    #[inline]
    pub fn rotation_matrix(&self) -> Mat3 {
        self.rotation.to_matrix()
    }

    /// Wire form: row-major 3x3 rotation followed by the translation.
    pub fn to_wire(&self) -> [f64; 12] {
        let m = self.rotation.to_matrix();
        let mut w = [0.0; 12];
        w[..9].copy_from_slice(&m);
        w[9..].copy_from_slice(&self.translation);
        w
    }

    /// Decode the wire form produced by [`Transform::to_wire`].
    pub fn from_wire(w: &[f64; 12]) -> Transform {
        let mut m = [0.0; 9];
        m.copy_from_slice(&w[..9]);
        Transform {
            rotation: Quaternion::from_matrix(&m),
            translation: [w[9], w[10], w[11]],
        }
    }

    /// Approximate equality within `eps` for both the rotation angle and the
    /// translation components.
    pub fn is_approx(&self, other: &Transform, eps: f64) -> bool {
        self.rotation.angle_to(&other.rotation) <= eps
            && self
                .translation
                .iter()
                .zip(other.translation.iter())
                .all(|(a, b)| (a - b).abs() <= eps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::Quaternion;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_compose_then_apply() {
        // Rotate 90 degrees about Z, then shift along parent X.
        let a = Transform::new(
            Quaternion::from_axis_angle([0.0, 0.0, 1.0], FRAC_PI_2),
            [1.0, 0.0, 0.0],
        );
        let b = Transform::from_translation([1.0, 0.0, 0.0]);

        let c = a.compose(&b);
        let p = c.apply([0.0, 0.0, 0.0]);
        assert!((p[0] - 1.0).abs() < 1e-12);
        assert!((p[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Transform::new(
            Quaternion::from_axis_angle([0.3, -1.0, 0.2], 0.9),
            [0.5, -2.0, 3.0],
        );
        let round = t.compose(&t.inverse());
        assert!(round.is_approx(&Transform::identity(), 1e-10));
    }

    #[test]
    fn test_wire_roundtrip() {
        let t = Transform::new(
            Quaternion::from_axis_angle([0.0, 1.0, 1.0], -0.6),
            [4.0, 5.0, 6.0],
        );
        let decoded = Transform::from_wire(&t.to_wire());
        assert!(t.is_approx(&decoded, 1e-10));
    }
}
