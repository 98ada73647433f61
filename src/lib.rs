//! # pointarchive
//!
//! Chunked, bounded-memory I/O for multi-scan point-cloud archives.
//!
//! An archive holds any number of scans. Each scan is a stream of
//! fixed-schema point records (coordinates, intensity, color, grid indices,
//! validity flags) plus metadata: pose, bounds, acquisition times and
//! environmental readings.
//!
//! ## Modules
//!
//! - [`util`] - Scalar kinds, typed arrays, errors, math types
//! - [`engine`] - Container format: node tree, record streams, blobs
//! - [`scan`] - Field registry, buffers, chunked transfers, transforms,
//!   scan headers and tree cloning
//! - [`archive`] - [`ScanArchive`], the multi-scan entry point
//!
//! ## Example
//!
//! ```ignore
//! use pointarchive::prelude::*;
//!
//! let archive = ScanArchive::open("site.pta")?;
//! for i in 0..archive.scan_count()? {
//!     let points = archive.read_scan(i, &ReadScanOptions::default())?;
//!     println!("scan {i}: {} points", points.point_count());
//! }
//! ```

pub mod util;
pub mod engine;
pub mod scan;
pub mod archive;

// Re-export commonly used types
pub use util::{Error, PointArray, Result, ScalarKind};
pub use archive::{ReadRawOptions, ReadScanOptions, ScanArchive, WriteScanOptions};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{DVec3, Error, PointArray, Result, ScalarKind};
    pub use crate::engine::{EngineOptions, ImageFile, NodeId, OpenMode, SourceDestBuffer};
    pub use crate::scan::{
        ChunkedStreamReader, ChunkedStreamWriter, CoordinateSystem, PointData, PointField, Pose,
        ScanHeader, ScanMetadata,
    };
    pub use crate::archive::{ReadRawOptions, ReadScanOptions, ScanArchive, WriteScanOptions};
}
