//! Container format engine.
//!
//! A minimal hierarchical archive: a tree of typed nodes (elements, blobs,
//! structures, vectors, compressed record vectors) stored as group tables
//! and data blocks. See [`format`] for the byte layout.
//!
//! - [`ImageFile`] - open/create/close, node construction and lookup
//! - [`CompressedVectorReader`] / [`CompressedVectorWriter`] - record streams
//! - [`SourceDestBuffer`] - typed buffer bound to a prototype leaf

pub mod format;
mod node;
mod buffer;
mod stream;
mod reader;
mod writer;
mod image;
mod records;
mod blob;

pub use node::{
    Blob, BlobSegment, CompressedVector, Element, FloatPrecision, Node, NodeId, NodeKind,
    RecordChunk, Structure, Vector,
};
pub use buffer::SourceDestBuffer;
pub use image::{EngineOptions, ImageFile, OpenMode};
pub use records::{CompressedVectorReader, CompressedVectorWriter};
