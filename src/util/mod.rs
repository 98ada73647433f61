//! Utility types shared by every layer.
//!
//! - [`ScalarKind`] - native element kinds of point buffers
//! - [`PointArray`] / [`ScanPod`] - typed contiguous arrays
//! - [`Error`] / [`Result`] - error handling
//! - Math type re-exports from glam and [`BBox3d`]

mod scalar;
mod array;
mod error;
mod math;

pub use scalar::*;
pub use array::*;
pub use error::*;
pub use math::*;
