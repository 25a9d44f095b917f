//! Small fixed-size linear algebra used by the transform stack.
//!
//! Matrices are stored as flat row-major `f64` arrays. Nothing here
//! allocates; the sizes involved (3x3 and 6x6) do not justify a matrix
//! library dependency.

use serde::{Deserialize, Serialize};

/// 3-vector alias used throughout the transform algebra.
pub type Vec3 = [f64; 3];

/// Unit quaternion (w, x, y, z) representing a 3D rotation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Quaternion {
    /// Scalar part.
    pub w: f64,
    /// Vector part, x component.
    pub x: f64,
    /// Vector part, y component.
    pub y: f64,
    /// Vector part, z component.
    pub z: f64,
}

impl Quaternion {
    /// Identity rotation.
    #[inline]
    pub const fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Rotation of `angle` radians about the (normalized) `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let n = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
        if n == 0.0 {
            return Self::identity();
        }
        let (s, c) = (angle * 0.5).sin_cos();
        Self {
            w: c,
            x: axis[0] / n * s,
            y: axis[1] / n * s,
            z: axis[2] / n * s,
        }
    }

    /// Hamilton product `self * other` (apply `other` first).
    #[inline]
    pub fn mul(&self, o: &Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * o.w - self.x * o.x - self.y * o.y - self.z * o.z,
            x: self.w * o.x + self.x * o.w + self.y * o.z - self.z * o.y,
            y: self.w * o.y - self.x * o.z + self.y * o.w + self.z * o.x,
            z: self.w * o.z + self.x * o.y - self.y * o.x + self.z * o.w,
        }
    }

    /// Conjugate; for unit quaternions this is the inverse rotation.
    #[inline]
    pub fn conjugate(&self) -> Quaternion {
        Quaternion {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Renormalize to unit length, guarding against drift after long
    /// composition chains.
    pub fn normalized(&self) -> Quaternion {
        let n = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if n == 0.0 {
            return Self::identity();
        }
        Quaternion {
            w: self.w / n,
            x: self.x / n,
            y: self.y / n,
            z: self.z / n,
        }
    }

    /// Rotate a vector.
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        // q * (0, v) * q^-1, expanded.
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);
        let tx = 2.0 * (y * v[2] - z * v[1]);
        let ty = 2.0 * (z * v[0] - x * v[2]);
        let tz = 2.0 * (x * v[1] - y * v[0]);
        [
            v[0] + w * tx + (y * tz - z * ty),
            v[1] + w * ty + (z * tx - x * tz),
            v[2] + w * tz + (x * ty - y * tx),
        ]
    }

    /// Row-major 3x3 rotation matrix.
    pub fn to_matrix(&self) -> Mat3 {
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);
        [
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
            2.0 * (x * y + w * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z - w * x),
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            1.0 - 2.0 * (x * x + y * y),
        ]
    }

    /// Recover a quaternion from a row-major rotation matrix.
    ///
    /// Uses the Shepperd branch selection so the result is numerically stable
    /// for all rotations.
    pub fn from_matrix(m: &Mat3) -> Quaternion {
        let trace = m[0] + m[4] + m[8];
        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Quaternion {
                w: 0.25 * s,
                x: (m[7] - m[5]) / s,
                y: (m[2] - m[6]) / s,
                z: (m[3] - m[1]) / s,
            }
        } else if m[0] > m[4] && m[0] > m[8] {
            let s = (1.0 + m[0] - m[4] - m[8]).sqrt() * 2.0;
            Quaternion {
                w: (m[7] - m[5]) / s,
                x: 0.25 * s,
                y: (m[1] + m[3]) / s,
                z: (m[2] + m[6]) / s,
            }
        } else if m[4] > m[8] {
            let s = (1.0 + m[4] - m[0] - m[8]).sqrt() * 2.0;
            Quaternion {
                w: (m[2] - m[6]) / s,
                x: (m[1] + m[3]) / s,
                y: 0.25 * s,
                z: (m[5] + m[7]) / s,
            }
        } else {
            let s = (1.0 + m[8] - m[0] - m[4]).sqrt() * 2.0;
            Quaternion {
                w: (m[3] - m[1]) / s,
                x: (m[2] + m[6]) / s,
                y: (m[5] + m[7]) / s,
                z: 0.25 * s,
            }
        };
        q.normalized()
    }

    /// Angular distance to another rotation in radians.
    pub fn angle_to(&self, other: &Quaternion) -> f64 {
        let d = self.conjugate().mul(other).normalized();
        2.0 * d.w.abs().min(1.0).acos()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Row-major 3x3 matrix.
pub type Mat3 = [f64; 9];

/// `a * b` for row-major 3x3 matrices.
pub fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut r = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            let mut acc = 0.0;
            for k in 0..3 {
                acc += a[i * 3 + k] * b[k * 3 + j];
            }
            r[i * 3 + j] = acc;
        }
    }
    r
}

/// Skew-symmetric cross-product matrix of `v`.
pub fn skew(v: Vec3) -> Mat3 {
    [
        0.0, -v[2], v[1], //
        v[2], 0.0, -v[0], //
        -v[1], v[0], 0.0,
    ]
}

/// Row-major 6x6 matrix.
pub type Mat6 = [f64; 36];

/// The 6x6 zero matrix.
pub const MAT6_ZERO: Mat6 = [0.0; 36];

/// `a * b` for row-major 6x6 matrices.
pub fn mat6_mul(a: &Mat6, b: &Mat6) -> Mat6 {
    let mut r = [0.0; 36];
    for i in 0..6 {
        for j in 0..6 {
            let mut acc = 0.0;
            for k in 0..6 {
                acc += a[i * 6 + k] * b[k * 6 + j];
            }
            r[i * 6 + j] = acc;
        }
    }
    r
}

/// Transpose of a row-major 6x6 matrix.
pub fn mat6_transpose(a: &Mat6) -> Mat6 {
    let mut r = [0.0; 36];
    for i in 0..6 {
        for j in 0..6 {
            r[j * 6 + i] = a[i * 6 + j];
        }
    }
    r
}

/// Element-wise sum.
pub fn mat6_add(a: &Mat6, b: &Mat6) -> Mat6 {
    let mut r = [0.0; 36];
    for (i, v) in r.iter_mut().enumerate() {
        *v = a[i] + b[i];
    }
    r
}

/// `a * p * a^T`, the congruence transform used to transport covariance.
pub fn mat6_sandwich(a: &Mat6, p: &Mat6) -> Mat6 {
    mat6_mul(&mat6_mul(a, p), &mat6_transpose(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_quaternion_rotate() {
        // 90 degrees about Z maps +X to +Y.
        let q = Quaternion::from_axis_angle([0.0, 0.0, 1.0], FRAC_PI_2);
        let v = q.rotate([1.0, 0.0, 0.0]);
        assert!((v[0]).abs() < 1e-12);
        assert!((v[1] - 1.0).abs() < 1e-12);
        assert!((v[2]).abs() < 1e-12);
    }

    #[test]
    fn test_quaternion_matrix_roundtrip() {
        let q = Quaternion::from_axis_angle([1.0, 2.0, -0.5], 1.3);
        let m = q.to_matrix();
        let q2 = Quaternion::from_matrix(&m);
        assert!(q.angle_to(&q2) < 1e-9);
    }

    #[test]
    fn test_quaternion_mul_matches_matrix_mul() {
        let a = Quaternion::from_axis_angle([0.0, 1.0, 0.0], 0.7);
        let b = Quaternion::from_axis_angle([1.0, 0.0, 0.0], -0.4);
        let qm = a.mul(&b).to_matrix();
        let mm = mat3_mul(&a.to_matrix(), &b.to_matrix());
        for i in 0..9 {
            assert!((qm[i] - mm[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_mat6_identity_sandwich() {
        let mut eye = MAT6_ZERO;
        for i in 0..6 {
            eye[i * 6 + i] = 1.0;
        }
        let mut p = MAT6_ZERO;
        for i in 0..6 {
            p[i * 6 + i] = (i + 1) as f64;
        }
        let r = mat6_sandwich(&eye, &p);
        for i in 0..36 {
            assert!((r[i] - p[i]).abs() < 1e-12);
        }
    }
}
