//! Math type re-exports and bounding boxes.
//!
//! Double precision throughout: scan coordinates are georeferenced and
//! routinely carry six or more significant digits before the decimal point.

pub use glam::{DMat3, DQuat, DVec3};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned box in double precision. [`BBox3d::EMPTY`] is inverted so
/// that the first expansion sets both corners.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox3d {
    pub min: DVec3,
    pub max: DVec3,
}

impl BBox3d {
    pub const EMPTY: Self = Self {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    #[inline]
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// True when any axis has `min > max`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    #[inline]
    pub fn expand_by_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// The eight corner points.
    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a.x, a.y, a.z),
            DVec3::new(b.x, a.y, a.z),
            DVec3::new(a.x, b.y, a.z),
            DVec3::new(b.x, b.y, a.z),
            DVec3::new(a.x, a.y, b.z),
            DVec3::new(b.x, a.y, b.z),
            DVec3::new(a.x, b.y, b.z),
            DVec3::new(b.x, b.y, b.z),
        ]
    }

    /// Axis-aligned hull of this box after mapping every corner through `f`.
    pub fn map_corners(&self, f: impl Fn(DVec3) -> DVec3) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for c in self.corners() {
            out.expand_by_point(f(c));
        }
        out
    }
}

impl Default for BBox3d {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BBox3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_from_empty() {
        let mut bounds = BBox3d::EMPTY;
        assert!(bounds.is_empty());
        for p in [DVec3::new(3.0, -2.0, 0.5), DVec3::new(-1.0, 4.0, 0.5)] {
            bounds.expand_by_point(p);
        }
        assert!(!bounds.is_empty());
        assert_eq!(bounds.min, DVec3::new(-1.0, -2.0, 0.5));
        assert_eq!(bounds.max, DVec3::new(3.0, 4.0, 0.5));
    }

    #[test]
    fn test_map_corners() {
        let b = BBox3d::new(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0));
        let rot = DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2);
        let hull = b.map_corners(|p| rot * p);
        assert!((hull.min - DVec3::new(-1.0, 0.0, 0.0)).length() < 1e-12);
        assert!((hull.max - DVec3::new(0.0, 2.0, 1.0)).length() < 1e-12);

        assert!(BBox3d::EMPTY.map_corners(|p| p).is_empty());
    }
}
