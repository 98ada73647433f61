//! Generic node tree copy between archives.
//!
//! Copying happens in two phases. [`copy_node`] rebuilds the node shell in
//! the destination and queues every compressed vector and blob it meets;
//! [`CloneWorklist::transfer`] then streams those payloads once the shell is
//! attached. Payloads are never touched during the structural pass.

use std::collections::VecDeque;

use tracing::{debug, debug_span, trace};

use super::chunked::{ChunkedStreamReader, StreamStats, DEFAULT_CHUNK_SIZE};
use crate::engine::{Element, ImageFile, Node, NodeId, SourceDestBuffer};
use crate::util::{Error, Result, ScalarKind};

/// Blob copy buffer size in bytes.
pub const BLOB_COPY_CHUNK: usize = 1 << 20;

/// A node and its copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodePair {
    pub source: NodeId,
    pub dest: NodeId,
}

/// Payloads still to be transferred, in discovery order.
#[derive(Clone, Debug, Default)]
pub struct CloneWorklist {
    pub compressed_vectors: VecDeque<NodePair>,
    pub blobs: VecDeque<NodePair>,
}

/// Counts reported by a payload transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloneReport {
    pub compressed_vectors: usize,
    pub records: u64,
    pub chunks: usize,
    pub blobs: usize,
    pub blob_bytes: u64,
}

/// Result of [`copy_node`]: the detached copy and its pending payloads.
#[derive(Clone, Debug)]
pub struct ClonedNode {
    pub node: NodeId,
    pub worklist: CloneWorklist,
}

impl CloneWorklist {
    pub fn is_empty(&self) -> bool {
        self.compressed_vectors.is_empty() && self.blobs.is_empty()
    }

    /// Append another worklist's queues to this one.
    pub fn extend(&mut self, other: CloneWorklist) {
        self.compressed_vectors.extend(other.compressed_vectors);
        self.blobs.extend(other.blobs);
    }

    /// Drain both queues, compressed vectors first.
    pub fn transfer(self, src: &ImageFile, dst: &mut ImageFile) -> Result<CloneReport> {
        self.transfer_with(src, dst, DEFAULT_CHUNK_SIZE)
    }

    /// [`transfer`](Self::transfer) moving at most `chunk_size` records per
    /// chunk.
    pub fn transfer_with(mut self, src: &ImageFile, dst: &mut ImageFile, chunk_size: usize) -> Result<CloneReport> {
        let mut report = CloneReport::default();
        while let Some(pair) = self.compressed_vectors.pop_front() {
            let stats = copy_compressed_vector_data(src, pair, dst, chunk_size)?;
            report.compressed_vectors += 1;
            report.records += stats.records;
            report.chunks += stats.chunks;
        }
        while let Some(pair) = self.blobs.pop_front() {
            report.blob_bytes += copy_blob_data(src, pair, dst)?;
            report.blobs += 1;
        }
        Ok(report)
    }
}

/// Copy `node` of `src` into `dst` as a new detached node.
///
/// Elements copy value and domain, scaled integers their raw value. Blobs and
/// compressed vectors are created empty and queued on the returned worklist.
pub fn copy_node(src: &ImageFile, node: NodeId, dst: &mut ImageFile) -> Result<ClonedNode> {
    let mut worklist = CloneWorklist::default();
    let copy = copy_into(src, node, dst, &mut worklist)?;
    Ok(ClonedNode {
        node: copy,
        worklist,
    })
}

fn copy_into(src: &ImageFile, node: NodeId, dst: &mut ImageFile, worklist: &mut CloneWorklist) -> Result<NodeId> {
    let copy = match src.node(node)? {
        Node::Element(Element::Integer { value, min, max }) => dst.new_integer(*value, *min, *max)?,
        Node::Element(Element::ScaledInteger {
            raw,
            min,
            max,
            scale,
            offset,
        }) => dst.new_scaled_integer(*raw, *min, *max, *scale, *offset)?,
        Node::Element(Element::Float {
            value,
            precision,
            min,
            max,
        }) => dst.new_float(*value, *precision, *min, *max)?,
        Node::Element(Element::String(s)) => dst.new_string(s.as_str())?,
        Node::Blob(blob) => {
            let copy = dst.new_blob(blob.byte_count)?;
            worklist.blobs.push_back(NodePair { source: node, dest: copy });
            copy
        }
        Node::Structure(s) => {
            let copy = dst.new_structure()?;
            for (name, child) in s.children.iter() {
                let child_copy = copy_into(src, *child, dst, worklist)?;
                dst.set(copy, name, child_copy)?;
            }
            copy
        }
        Node::Vector(v) => {
            let copy = dst.new_vector(v.allow_hetero)?;
            for child in v.children.iter() {
                let child_copy = copy_into(src, *child, dst, worklist)?;
                dst.append(copy, child_copy)?;
            }
            copy
        }
        Node::CompressedVector(cv) => {
            let prototype = copy_into(src, cv.prototype, dst, worklist)?;
            let codecs = copy_into(src, cv.codecs, dst, worklist)?;
            let copy = dst.new_compressed_vector(prototype, codecs)?;
            worklist
                .compressed_vectors
                .push_back(NodePair { source: node, dest: copy });
            copy
        }
    };
    trace!(kind = %src.kind(node)?, "copied node shell");
    Ok(copy)
}

/// Stream every record of `pair.source` into `pair.dest`.
///
/// Integer and scaled integer leaves move as raw `i64` without scaling, float
/// leaves as `f64`, so values are carried over unchanged.
pub fn copy_compressed_vector_data(
    src: &ImageFile,
    pair: NodePair,
    dst: &mut ImageFile,
    chunk_size: usize,
) -> Result<StreamStats> {
    let cv = src.compressed_vector(pair.source)?;
    let total = cv.record_count;
    let capacity = (chunk_size.max(1) as u64).min(total) as usize;
    let _span = debug_span!("copy_records", records = total).entered();

    let mut buffers = src
        .leaves(cv.prototype)?
        .into_iter()
        .map(|leaf| {
            let kind = match src.lookup(cv.prototype, &leaf.path).and_then(|id| src.element(id).cloned())? {
                Element::Float { .. } => ScalarKind::Float64,
                _ => ScalarKind::Int64,
            };
            SourceDestBuffer::zeroed(leaf.path, kind, capacity, false, false)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut writer = dst.writer(pair.dest)?;
    let stats = ChunkedStreamReader::read_with(src, pair.source, &mut buffers, |bufs, n| writer.write(bufs, n))?;
    writer.close()?;
    if writer.record_count() != total {
        return Err(Error::TruncatedStream {
            read: writer.record_count(),
            expected: total,
        });
    }
    debug!(records = stats.records, chunks = stats.chunks, "copied record stream");
    Ok(stats)
}

/// Copy the bytes of `pair.source` into `pair.dest` in fixed-size pieces.
/// Returns the number of bytes moved.
pub fn copy_blob_data(src: &ImageFile, pair: NodePair, dst: &mut ImageFile) -> Result<u64> {
    let byte_count = src.blob(pair.source)?.byte_count;
    let mut buf = vec![0u8; BLOB_COPY_CHUNK.min(byte_count as usize)];
    let mut start = 0u64;
    while start < byte_count {
        let len = (buf.len() as u64).min(byte_count - start) as usize;
        src.read_blob(pair.source, &mut buf[..len], start)?;
        dst.write_blob(pair.dest, &buf[..len], start)?;
        start += len as u64;
    }
    trace!(bytes = byte_count, "copied blob");
    Ok(byte_count)
}

/// Copy every root child of `src` under the root of `dst`, then transfer all
/// queued payloads.
pub fn clone_image(src: &ImageFile, dst: &mut ImageFile) -> Result<CloneReport> {
    let _span = debug_span!("clone_image", src = %src.path().display()).entered();
    let root = src.root();
    let mut worklist = CloneWorklist::default();
    for child in src.children(root)? {
        let name = src.element_name(child)?;
        let cloned = copy_node(src, child, dst)?;
        let dst_root = dst.root();
        dst.set(dst_root, name, cloned.node)?;
        worklist.extend(cloned.worklist);
    }
    let report = worklist.transfer(src, dst)?;
    debug!(
        compressed_vectors = report.compressed_vectors,
        records = report.records,
        blobs = report.blobs,
        "cloned image"
    );
    Ok(report)
}
