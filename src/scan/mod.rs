//! Scan-level building blocks on top of the format engine.
//!
//! - [`PointField`] / [`CoordinateSystem`] - field registry
//! - [`PointData`] / [`BufferSet`] - typed per-field arrays and buffer bindings
//! - [`ChunkedStreamReader`] / [`ChunkedStreamWriter`] - bounded-memory transfers
//! - [`Pose`] and free transform functions - coordinate conversions
//! - [`ScanHeader`] / [`ScanMetadata`] - scan metadata views
//! - [`copy_node`] / [`clone_image`] - tree copy with deferred payloads

pub mod fields;
pub mod buffers;
pub mod chunked;
pub mod transform;
pub mod header;
pub mod clone;

// Re-export field registry
pub use fields::{
    CoordinateSystem, PointField, CARTESIAN_FIELDS, COLOR_FIELDS, SPHERICAL_FIELDS,
    SUPPORTED_POINT_FIELDS,
};

// Re-export buffers
pub use buffers::{make_buffer, make_buffers, make_named_buffer, BufferSet, PointData};

// Re-export chunked transfer
pub use chunked::{read_all, ChunkedStreamReader, ChunkedStreamWriter, StreamStats, DEFAULT_CHUNK_SIZE};

// Re-export transforms
pub use transform::{
    quat_from_wxyz, spherical_to_cartesian, spherical_to_cartesian_points, to_global, to_local, Pose,
};

// Re-export header types
pub use header::{
    AcquisitionTime, CartesianBounds, ColorLimits, IndexBounds, IntensityLimits, ScanHeader,
    ScanMetadata, SphericalBounds,
};

// Re-export cloning
pub use clone::{
    clone_image, copy_blob_data, copy_compressed_vector_data, copy_node, CloneReport, CloneWorklist,
    ClonedNode, NodePair,
};
