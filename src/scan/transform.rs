//! Coordinate conversions and pose transforms.
//!
//! Rotations are unit quaternions given as `[w, x, y, z]`. Non-normalized
//! quaternions are passed through as-is; normalizing is the caller's job.

use serde::{Deserialize, Serialize};

use crate::util::{DMat3, DQuat, DVec3, Error, Result};

/// Convert one spherical coordinate (range, azimuth, elevation; radians) to
/// cartesian.
#[inline]
pub fn spherical_to_cartesian(range: f64, azimuth: f64, elevation: f64) -> DVec3 {
    let range_cos_el = range * elevation.cos();
    DVec3::new(
        range_cos_el * azimuth.cos(),
        range_cos_el * azimuth.sin(),
        range * elevation.sin(),
    )
}

/// Element-wise [`spherical_to_cartesian`] over parallel columns.
pub fn spherical_to_cartesian_points(
    range: &[f64],
    azimuth: &[f64],
    elevation: &[f64],
) -> Result<Vec<DVec3>> {
    for (name, column) in [("sphericalAzimuth", azimuth), ("sphericalElevation", elevation)] {
        if column.len() != range.len() {
            return Err(Error::LengthMismatch {
                field: name.to_string(),
                expected: range.len(),
                actual: column.len(),
            });
        }
    }
    Ok(range
        .iter()
        .zip(azimuth)
        .zip(elevation)
        .map(|((&r, &a), &e)| spherical_to_cartesian(r, a, e))
        .collect())
}

/// Quaternion from `[w, x, y, z]` components.
#[inline]
pub fn quat_from_wxyz(q: [f64; 4]) -> DQuat {
    DQuat::from_xyzw(q[1], q[2], q[3], q[0])
}

/// Local to global: `R(q) * p + t`.
pub fn to_global(points: &[DVec3], rotation: [f64; 4], translation: [f64; 3]) -> Vec<DVec3> {
    Pose::from_wxyz(rotation, translation).to_global(points)
}

/// Global to local: `R(q*) * (p - t)`.
pub fn to_local(points: &[DVec3], rotation: [f64; 4], translation: [f64; 3]) -> Vec<DVec3> {
    Pose::from_wxyz(rotation, translation).to_local(points)
}

/// Rigid transform placing a scan's local frame in the global frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: DQuat,
    pub translation: DVec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    pub fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_wxyz(rotation: [f64; 4], translation: [f64; 3]) -> Self {
        Self::new(quat_from_wxyz(rotation), DVec3::from_array(translation))
    }

    /// Rotation as `[w, x, y, z]`.
    pub fn rotation_wxyz(&self) -> [f64; 4] {
        let q = self.rotation;
        [q.w, q.x, q.y, q.z]
    }

    pub fn rotation_matrix(&self) -> DMat3 {
        DMat3::from_quat(self.rotation)
    }

    #[inline]
    pub fn to_global_point(&self, p: DVec3) -> DVec3 {
        self.rotation * p + self.translation
    }

    #[inline]
    pub fn to_local_point(&self, p: DVec3) -> DVec3 {
        self.rotation.conjugate() * (p - self.translation)
    }

    pub fn to_global(&self, points: &[DVec3]) -> Vec<DVec3> {
        points.iter().map(|&p| self.to_global_point(p)).collect()
    }

    pub fn to_local(&self, points: &[DVec3]) -> Vec<DVec3> {
        points.iter().map(|&p| self.to_local_point(p)).collect()
    }

    /// Transform parallel coordinate columns to the global frame in place.
    pub fn apply_to_columns(&self, x: &mut [f64], y: &mut [f64], z: &mut [f64]) {
        for ((x, y), z) in x.iter_mut().zip(y.iter_mut()).zip(z.iter_mut()) {
            let g = self.to_global_point(DVec3::new(*x, *y, *z));
            (*x, *y, *z) = (g.x, g.y, g.z);
        }
    }
}
