//! Axis-aligned extents of a cartesian map.

use serde::{Deserialize, Serialize};

use super::math::Vec3;

/// Axis-aligned bounding box in map coordinates.
///
/// Two-dimensional maps report extents with a zero-width Z range. The empty
/// extents has min > max, so it will expand to fit any point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extents {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Extents {
    /// Create extents from min and max corners.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create empty (invalid) extents.
    #[inline]
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Check whether the extents are empty (invalid).
    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// Expand to include a point.
    pub fn expand_to_include(&mut self, p: Vec3) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Smallest box containing both extents.
    pub fn union(&self, other: &Extents) -> Extents {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let mut r = *self;
        r.expand_to_include(other.min);
        r.expand_to_include(other.max);
        r
    }

    /// Check whether a point lies inside (inclusive).
    pub fn contains(&self, p: Vec3) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Center point of the box.
    pub fn center(&self) -> Vec3 {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }
}

impl Default for Extents {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_expands() {
        let mut e = Extents::empty();
        assert!(e.is_empty());
        e.expand_to_include([1.0, 2.0, 3.0]);
        assert!(!e.is_empty());
        assert_eq!(e.min, [1.0, 2.0, 3.0]);
        assert_eq!(e.max, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_union_with_empty() {
        let a = Extents::new([0.0; 3], [1.0; 3]);
        let empty = Extents::empty();
        assert_eq!(a.union(&empty), a);
        assert_eq!(empty.union(&a), a);
    }

    #[test]
    fn test_contains() {
        let e = Extents::new([0.0; 3], [2.0; 3]);
        assert!(e.contains([1.0, 1.0, 1.0]));
        assert!(e.contains([0.0, 0.0, 0.0]));
        assert!(!e.contains([3.0, 1.0, 1.0]));
    }
}
