//! Error types for the pointarchive library.

use std::path::PathBuf;
use thiserror::Error;

use super::ScalarKind;

/// Main error type for archive operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Field name is not in the point field registry
    #[error("Unsupported point field: {0}")]
    UnsupportedField(String),

    /// Buffer storage kind is outside the bindable allow-list
    #[error("Unsupported buffer storage type: {0}")]
    UnsupportedBufferType(ScalarKind),

    /// Requested field is absent from the scan prototype
    #[error(
        "Requested field {0} is absent from the scan prototype \
         (set ignore_missing_fields to skip it)"
    )]
    MissingField(String),

    /// Prototype matches neither the cartesian nor the spherical field set
    #[error("Unsupported coordinate system for point fields {fields:?}")]
    UnsupportedCoordinateSystem { fields: Vec<String> },

    /// Pose requested on a scan that has none
    #[error("Scan header doesn't contain a pose")]
    MissingPose,

    /// Scan or child index outside bounds
    #[error("Index {index} out of range (count: {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid magic bytes at start of file
    #[error("Invalid archive: expected magic bytes")]
    InvalidMagic,

    /// Unsupported file format version
    #[error("Unsupported archive version: {0}")]
    UnsupportedVersion(u16),

    /// File is truncated or corrupted
    #[error("Unexpected end of file at position {0}")]
    UnexpectedEof(u64),

    /// Invalid data structure in file
    #[error("Invalid file structure: {0}")]
    InvalidStructure(String),

    /// Node has a different type than the caller expected
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Path does not name a node (or a prototype leaf)
    #[error("Path not defined: {0}")]
    PathUndefined(String),

    /// Structure already has a child with this name
    #[error("Duplicate child name: {0}")]
    DuplicateName(String),

    /// Node already has a parent
    #[error("Node is already attached: {0}")]
    AlreadyAttached(String),

    /// Homogeneous vector received a child of a different type
    #[error("Vector does not allow heterogeneous children: expected {expected}, got {actual}")]
    HeterogeneousVector { expected: String, actual: String },

    /// Value outside the declared numeric domain
    #[error("Value {value} out of bounds [{min}, {max}]")]
    ValueOutOfBounds { value: f64, min: f64, max: f64 },

    /// Value cannot be represented in the destination buffer
    #[error("Value {value} not representable in {kind} buffer {path}")]
    ValueNotRepresentable { path: String, kind: ScalarKind, value: f64 },

    /// Integer/float transfer attempted without conversion enabled
    #[error("Conversion required for buffer {0} (enable do_conversion)")]
    ConversionRequired(String),

    /// Buffers passed to one transfer have different capacities
    #[error("Buffer capacity mismatch: {path} has {actual}, expected {expected}")]
    BufferSizeMismatch { path: String, expected: usize, actual: usize },

    /// Writer was not given a buffer for a prototype leaf
    #[error("No buffer for prototype element: {0}")]
    MissingBuffer(String),

    /// Same path name bound twice in one transfer
    #[error("Duplicate buffer path name: {0}")]
    DuplicateBuffer(String),

    /// Point arrays of one scan disagree in length
    #[error("Field {field} has {actual} values, expected {expected}")]
    LengthMismatch { field: String, expected: usize, actual: usize },

    /// Coordinate of a valid point is NaN or infinite
    #[error("Field {field} has non-finite value {value} at point {index}")]
    NonFiniteValue { field: String, index: usize, value: f64 },

    /// Record stream ended before the expected record count
    #[error("Record stream ended after {read} of {expected} records")]
    TruncatedStream { read: u64, expected: u64 },

    /// Another reader is already open on this record stream
    #[error("Record stream already has an open reader: {0}")]
    StreamBusy(String),

    /// Compressed vector records can only be written once
    #[error("Compressed vector already written: {0}")]
    AlreadyWritten(String),

    /// Archive is not writable (opened read-only)
    #[error("Archive is read-only")]
    ReadOnly,

    /// Operation needs an archive opened for reading
    #[error("Archive is write-only")]
    WriteOnly,

    /// Archive has been closed
    #[error("Archive is closed")]
    Closed,

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
