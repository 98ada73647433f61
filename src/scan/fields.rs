//! Point field registry: semantic field names and their native storage.

use std::fmt;
use std::str::FromStr;

use crate::util::{Error, Result, ScalarKind};

/// A supported per-point field.
///
/// Declaration order is the canonical field order used by
/// [`PointData`](crate::scan::PointData) and by newly written prototypes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PointField {
    CartesianX,
    CartesianY,
    CartesianZ,
    SphericalRange,
    SphericalAzimuth,
    SphericalElevation,
    Intensity,
    ColorRed,
    ColorGreen,
    ColorBlue,
    RowIndex,
    ColumnIndex,
    CartesianInvalidState,
    SphericalInvalidState,
}

/// Every supported field, in canonical order.
pub const SUPPORTED_POINT_FIELDS: [PointField; 14] = [
    PointField::CartesianX,
    PointField::CartesianY,
    PointField::CartesianZ,
    PointField::SphericalRange,
    PointField::SphericalAzimuth,
    PointField::SphericalElevation,
    PointField::Intensity,
    PointField::ColorRed,
    PointField::ColorGreen,
    PointField::ColorBlue,
    PointField::RowIndex,
    PointField::ColumnIndex,
    PointField::CartesianInvalidState,
    PointField::SphericalInvalidState,
];

/// Cartesian coordinate fields.
pub const CARTESIAN_FIELDS: [PointField; 3] = [
    PointField::CartesianX,
    PointField::CartesianY,
    PointField::CartesianZ,
];

/// Spherical coordinate fields.
pub const SPHERICAL_FIELDS: [PointField; 3] = [
    PointField::SphericalRange,
    PointField::SphericalAzimuth,
    PointField::SphericalElevation,
];

/// Color channel fields.
pub const COLOR_FIELDS: [PointField; 3] = [
    PointField::ColorRed,
    PointField::ColorGreen,
    PointField::ColorBlue,
];

impl PointField {
    /// Look up a field by its archive name.
    pub fn from_name(name: &str) -> Result<Self> {
        SUPPORTED_POINT_FIELDS
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::UnsupportedField(name.to_string()))
    }

    /// Archive name of the field.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CartesianX => "cartesianX",
            Self::CartesianY => "cartesianY",
            Self::CartesianZ => "cartesianZ",
            Self::SphericalRange => "sphericalRange",
            Self::SphericalAzimuth => "sphericalAzimuth",
            Self::SphericalElevation => "sphericalElevation",
            Self::Intensity => "intensity",
            Self::ColorRed => "colorRed",
            Self::ColorGreen => "colorGreen",
            Self::ColorBlue => "colorBlue",
            Self::RowIndex => "rowIndex",
            Self::ColumnIndex => "columnIndex",
            Self::CartesianInvalidState => "cartesianInvalidState",
            Self::SphericalInvalidState => "sphericalInvalidState",
        }
    }

    /// Native storage kind of in-memory arrays for this field.
    pub const fn kind(self) -> ScalarKind {
        match self {
            Self::CartesianX
            | Self::CartesianY
            | Self::CartesianZ
            | Self::SphericalRange
            | Self::SphericalAzimuth
            | Self::SphericalElevation => ScalarKind::Float64,
            Self::Intensity => ScalarKind::Float32,
            Self::ColorRed | Self::ColorGreen | Self::ColorBlue => ScalarKind::Uint8,
            Self::RowIndex | Self::ColumnIndex => ScalarKind::Uint16,
            Self::CartesianInvalidState | Self::SphericalInvalidState => ScalarKind::Int8,
        }
    }

    /// Storage width in bytes.
    #[inline]
    pub const fn width(self) -> usize {
        self.kind().num_bytes()
    }

    /// Per-point flag marking coordinates as not meaningful. Domain `{0, 1}`.
    #[inline]
    pub const fn is_validity_flag(self) -> bool {
        matches!(self, Self::CartesianInvalidState | Self::SphericalInvalidState)
    }
}

impl fmt::Display for PointField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PointField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// Canonical coordinate field set of a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoordinateSystem {
    Cartesian,
    Spherical,
}

impl CoordinateSystem {
    /// The three coordinate fields of the system.
    pub const fn fields(self) -> [PointField; 3] {
        match self {
            Self::Cartesian => CARTESIAN_FIELDS,
            Self::Spherical => SPHERICAL_FIELDS,
        }
    }

    /// The validity flag field paired with the system.
    pub const fn validity_field(self) -> PointField {
        match self {
            Self::Cartesian => PointField::CartesianInvalidState,
            Self::Spherical => PointField::SphericalInvalidState,
        }
    }

    /// Classify a prototype by its field names. Cartesian wins when both
    /// sets are complete; neither complete fails.
    pub fn classify<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let has_all = |set: [PointField; 3]| {
            set.iter()
                .all(|f| names.iter().any(|n| n.as_ref() == f.name()))
        };
        if has_all(CARTESIAN_FIELDS) {
            Ok(Self::Cartesian)
        } else if has_all(SPHERICAL_FIELDS) {
            Ok(Self::Spherical)
        } else {
            Err(Error::UnsupportedCoordinateSystem {
                fields: names.iter().map(|n| n.as_ref().to_string()).collect(),
            })
        }
    }
}
