//! Record streams: reading and writing compressed vector payloads.
//!
//! Records are stored column-wise, one data block per prototype leaf per
//! written chunk. Integer and scaled integer leaves are stored as raw `i64`,
//! float leaves as `f32` or `f64` according to their precision.

use std::collections::HashSet;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use tracing::{debug, trace, warn};

use super::buffer::SourceDestBuffer;
use super::image::ImageFile;
use super::node::*;
use super::reader::IStreams;
use crate::util::{Error, Result, Scalar, ScalarKind};

/// Encoding of one prototype leaf.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum LeafCodec {
    Integer { min: i64, max: i64 },
    Scaled { min: i64, max: i64, scale: f64, offset: f64 },
    Float { precision: FloatPrecision },
}

impl LeafCodec {
    #[inline]
    fn width(self) -> usize {
        match self {
            Self::Integer { .. } | Self::Scaled { .. } => 8,
            Self::Float { precision } => precision.num_bytes(),
        }
    }

    /// Whether the value handed to a buffer is a float.
    #[inline]
    fn yields_float(self, do_scaling: bool) -> bool {
        match self {
            Self::Integer { .. } => false,
            Self::Scaled { .. } => do_scaling,
            Self::Float { .. } => true,
        }
    }
}

/// A prototype leaf: its path relative to the prototype and its codec.
#[derive(Clone, Debug)]
pub(crate) struct Leaf {
    pub path: String,
    pub codec: LeafCodec,
}

impl ImageFile {
    /// Depth-first leaves of a prototype structure.
    pub(crate) fn leaves(&self, prototype: NodeId) -> Result<Vec<Leaf>> {
        let mut out = Vec::new();
        self.collect_leaves(prototype, "", &mut out)?;
        Ok(out)
    }

    fn collect_leaves(&self, id: NodeId, prefix: &str, out: &mut Vec<Leaf>) -> Result<()> {
        let members: Vec<(String, NodeId)> = match self.node(id)? {
            Node::Structure(s) => s.children.clone(),
            Node::Vector(v) => v
                .children
                .iter()
                .enumerate()
                .map(|(i, c)| (i.to_string(), *c))
                .collect(),
            other => {
                return Err(Error::type_mismatch("Structure or Vector", other.kind().name()));
            }
        };

        for (name, child) in members {
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let codec = match self.node(child)? {
                Node::Element(Element::Integer { min, max, .. }) => LeafCodec::Integer {
                    min: *min,
                    max: *max,
                },
                Node::Element(Element::ScaledInteger {
                    min,
                    max,
                    scale,
                    offset,
                    ..
                }) => LeafCodec::Scaled {
                    min: *min,
                    max: *max,
                    scale: *scale,
                    offset: *offset,
                },
                Node::Element(Element::Float { precision, .. }) => LeafCodec::Float {
                    precision: *precision,
                },
                Node::Structure(_) | Node::Vector(_) => {
                    self.collect_leaves(child, &path, out)?;
                    continue;
                }
                other => {
                    return Err(Error::invalid(format!(
                        "{} element {path} cannot be a record field",
                        other.kind()
                    )));
                }
            };
            out.push(Leaf { path, codec });
        }
        Ok(())
    }

    /// Leaf paths of a compressed vector's prototype, in record order.
    pub fn leaf_paths(&self, cv: NodeId) -> Result<Vec<String>> {
        let prototype = self.compressed_vector(cv)?.prototype;
        Ok(self.leaves(prototype)?.into_iter().map(|l| l.path).collect())
    }

    /// Open a reader over a compressed vector. Read mode only; at most one
    /// reader per compressed vector at a time.
    pub fn reader(&self, cv: NodeId) -> Result<CompressedVectorReader<'_>> {
        self.streams()?;
        let node = self.compressed_vector(cv)?;
        let leaves = self.leaves(node.prototype)?;
        if !self.active_readers.borrow_mut().insert(cv) {
            return Err(Error::StreamBusy(self.path_name(cv)?));
        }
        trace!(records = node.record_count, fields = leaves.len(), "opened record reader");
        Ok(CompressedVectorReader {
            image: self,
            cv,
            leaves,
            record_count: node.record_count,
            position: 0,
            open: true,
        })
    }

    /// Open the writer of a compressed vector. Write mode only; each
    /// compressed vector is written once.
    pub fn writer(&mut self, cv: NodeId) -> Result<CompressedVectorWriter<'_>> {
        self.ensure_writable()?;
        let node = self.compressed_vector(cv)?;
        if node.written {
            return Err(Error::AlreadyWritten(self.path_name(cv)?));
        }
        let leaves = self.leaves(node.prototype)?;
        if let Node::CompressedVector(node) = self.node_mut(cv)? {
            node.written = true;
        }
        Ok(CompressedVectorWriter {
            image: self,
            cv,
            leaves,
            chunks: Vec::new(),
            record_count: 0,
            open: true,
        })
    }
}

/// Pair every buffer with its leaf. Returns the leaf index per buffer.
fn bind(leaves: &[Leaf], buffers: &[SourceDestBuffer], require_all: bool) -> Result<Vec<usize>> {
    let capacity = buffers.first().map(|b| b.capacity()).unwrap_or(0);
    let mut seen = HashSet::new();
    let mut bound = Vec::with_capacity(buffers.len());

    for buf in buffers {
        if buf.capacity() != capacity {
            return Err(Error::BufferSizeMismatch {
                path: buf.path_name().to_string(),
                expected: capacity,
                actual: buf.capacity(),
            });
        }
        let path = buf.path_name().trim_start_matches('/');
        let leaf = leaves
            .iter()
            .position(|l| l.path == path)
            .ok_or_else(|| Error::PathUndefined(buf.path_name().to_string()))?;
        if !seen.insert(leaf) {
            return Err(Error::DuplicateBuffer(buf.path_name().to_string()));
        }
        let codec = leaves[leaf].codec;
        if codec.yields_float(buf.do_scaling()) != buf.kind().is_float() && !buf.do_conversion() {
            return Err(Error::ConversionRequired(buf.path_name().to_string()));
        }
        bound.push(leaf);
    }

    if require_all {
        if let Some(missing) = (0..leaves.len()).find(|i| !seen.contains(i)) {
            return Err(Error::MissingBuffer(leaves[missing].path.clone()));
        }
    }
    Ok(bound)
}

/// Decode `count` records of a column block, starting at record `first`.
fn read_column(
    streams: &IStreams,
    codec: LeafCodec,
    column_pos: u64,
    chunk_records: u64,
    first: u64,
    count: usize,
) -> Result<Vec<Scalar>> {
    let width = codec.width();
    let stored = streams.read_u64(column_pos)?;
    if stored != chunk_records * width as u64 {
        return Err(Error::invalid(format!(
            "column block at {column_pos} holds {stored} bytes, expected {}",
            chunk_records * width as u64
        )));
    }
    let bytes = streams.read_bytes(column_pos + 8 + first * width as u64, count * width)?;
    Ok(match codec {
        LeafCodec::Integer { .. } | LeafCodec::Scaled { .. } => bytes
            .chunks_exact(8)
            .map(|c| Scalar::Int(LittleEndian::read_i64(c)))
            .collect(),
        LeafCodec::Float {
            precision: FloatPrecision::Single,
        } => bytes
            .chunks_exact(4)
            .map(|c| Scalar::Float(LittleEndian::read_f32(c) as f64))
            .collect(),
        LeafCodec::Float {
            precision: FloatPrecision::Double,
        } => bytes
            .chunks_exact(8)
            .map(|c| Scalar::Float(LittleEndian::read_f64(c)))
            .collect(),
    })
}

/// Store one decoded record value into a buffer slot.
fn store(buf: &mut SourceDestBuffer, codec: LeafCodec, index: usize, value: Scalar) -> Result<()> {
    let value = match (codec, value) {
        (LeafCodec::Scaled { scale, offset, .. }, Scalar::Int(raw)) if buf.do_scaling() => {
            Scalar::Float(raw as f64 * scale + offset)
        }
        (_, v) => v,
    };
    let ok = match value {
        Scalar::Int(v) => buf.array_mut().set_int(index, v),
        Scalar::Float(v) => buf.array_mut().set_float(index, v),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::ValueNotRepresentable {
            path: buf.path_name().to_string(),
            kind: buf.kind(),
            value: value.as_f64(),
        })
    }
}

fn round_to_i64(path: &str, value: f64) -> Result<i64> {
    let r = value.round();
    if r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64 {
        Ok(r as i64)
    } else {
        Err(Error::ValueNotRepresentable {
            path: path.to_string(),
            kind: ScalarKind::Int64,
            value,
        })
    }
}

fn check_domain(raw: i64, min: i64, max: i64) -> Result<i64> {
    if raw < min || raw > max {
        return Err(Error::ValueOutOfBounds {
            value: raw as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(raw)
}

/// Encode `count` values of a buffer into a column block payload.
fn encode_column(buf: &SourceDestBuffer, leaf: &Leaf, count: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(count * leaf.codec.width());
    for i in 0..count {
        let value = buf
            .array()
            .get(i)
            .ok_or_else(|| Error::invalid(format!("buffer {} has no element {i}", buf.path_name())))?;
        match leaf.codec {
            LeafCodec::Integer { min, max } => {
                let raw = match value {
                    Scalar::Int(v) => v,
                    Scalar::Float(f) => round_to_i64(&leaf.path, f)?,
                };
                out.write_i64::<LittleEndian>(check_domain(raw, min, max)?)?;
            }
            LeafCodec::Scaled {
                min,
                max,
                scale,
                offset,
            } => {
                let raw = match value {
                    v if buf.do_scaling() => round_to_i64(&leaf.path, (v.as_f64() - offset) / scale)?,
                    Scalar::Int(v) => v,
                    Scalar::Float(f) => round_to_i64(&leaf.path, f)?,
                };
                out.write_i64::<LittleEndian>(check_domain(raw, min, max)?)?;
            }
            LeafCodec::Float { precision } => match precision {
                FloatPrecision::Single => out.write_f32::<LittleEndian>(value.as_f64() as f32)?,
                FloatPrecision::Double => out.write_f64::<LittleEndian>(value.as_f64())?,
            },
        }
    }
    Ok(out)
}

/// Scoped reader over one compressed vector. Closes on drop.
pub struct CompressedVectorReader<'a> {
    image: &'a ImageFile,
    cv: NodeId,
    leaves: Vec<Leaf>,
    record_count: u64,
    position: u64,
    open: bool,
}

impl<'a> CompressedVectorReader<'a> {
    /// Total records in the stream.
    #[inline]
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Index of the next record to be read.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Fill the buffers with the next records. Returns the number of records
    /// transferred: the buffer capacity, less on the final chunk, zero at the
    /// end of the stream.
    pub fn read(&mut self, buffers: &mut [SourceDestBuffer]) -> Result<usize> {
        if !self.open {
            return Err(Error::Closed);
        }
        let bound = bind(&self.leaves, buffers, false)?;
        let capacity = buffers.first().map(|b| b.capacity()).unwrap_or(0);
        let remaining = self.record_count - self.position;
        let n = (capacity as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }

        let streams = self.image.streams()?;
        let chunks = &self.image.compressed_vector(self.cv)?.chunks;
        let (begin, end) = (self.position, self.position + n as u64);

        let mut chunk_start = 0u64;
        for chunk in chunks {
            let chunk_end = chunk_start + chunk.record_count;
            if chunk_end > begin && chunk_start < end {
                let first = begin.max(chunk_start);
                let last = end.min(chunk_end);
                let count = (last - first) as usize;
                let dst = (first - begin) as usize;
                for (buf, &leaf_index) in buffers.iter_mut().zip(&bound) {
                    let codec = self.leaves[leaf_index].codec;
                    let column = *chunk.columns.get(leaf_index).ok_or_else(|| {
                        Error::invalid(format!("record chunk lacks column {leaf_index}"))
                    })?;
                    let values = read_column(
                        streams,
                        codec,
                        column,
                        chunk.record_count,
                        first - chunk_start,
                        count,
                    )?;
                    for (i, value) in values.into_iter().enumerate() {
                        store(buf, codec, dst + i, value)?;
                    }
                }
            }
            if chunk_end >= end {
                break;
            }
            chunk_start = chunk_end;
        }

        self.position = end;
        trace!(records = n, position = self.position, "read records");
        Ok(n)
    }

    /// Reposition to record `record` (may equal the record count).
    pub fn seek(&mut self, record: u64) -> Result<()> {
        if !self.open {
            return Err(Error::Closed);
        }
        if record > self.record_count {
            return Err(Error::IndexOutOfRange {
                index: record as usize,
                count: self.record_count as usize,
            });
        }
        self.position = record;
        Ok(())
    }

    /// Release the stream. Idempotent.
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            self.image.active_readers.borrow_mut().remove(&self.cv);
        }
    }
}

impl Drop for CompressedVectorReader<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scoped writer of one compressed vector. Closes on drop.
pub struct CompressedVectorWriter<'a> {
    image: &'a mut ImageFile,
    cv: NodeId,
    leaves: Vec<Leaf>,
    chunks: Vec<RecordChunk>,
    record_count: u64,
    open: bool,
}

impl<'a> CompressedVectorWriter<'a> {
    /// Records written so far.
    #[inline]
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Append the first `count` records held by `buffers`. Every prototype
    /// leaf needs exactly one buffer.
    pub fn write(&mut self, buffers: &[SourceDestBuffer], count: usize) -> Result<()> {
        if !self.open {
            return Err(Error::Closed);
        }
        let bound = bind(&self.leaves, buffers, true)?;
        if let Some(first) = buffers.first() {
            if count > first.capacity() {
                return Err(Error::BufferSizeMismatch {
                    path: first.path_name().to_string(),
                    expected: count,
                    actual: first.capacity(),
                });
            }
        }
        if count == 0 {
            return Ok(());
        }

        // Encode every column before touching the file.
        let mut columns = vec![Vec::new(); self.leaves.len()];
        for (buf, &leaf_index) in buffers.iter().zip(&bound) {
            columns[leaf_index] = encode_column(buf, &self.leaves[leaf_index], count)?;
        }

        let stream = self.image.stream_mut()?;
        let positions = columns
            .iter()
            .map(|c| stream.write_data_block(c))
            .collect::<Result<Vec<_>>>()?;
        self.chunks.push(RecordChunk {
            record_count: count as u64,
            columns: positions,
        });
        self.record_count += count as u64;
        trace!(records = count, total = self.record_count, "wrote record chunk");
        Ok(())
    }

    /// Commit the record count and chunk table to the node. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let chunks = std::mem::take(&mut self.chunks);
        let record_count = self.record_count;
        if let Node::CompressedVector(node) = self.image.node_mut(self.cv)? {
            node.record_count = record_count;
            node.chunks = chunks;
        }
        debug!(records = record_count, "closed record writer");
        Ok(())
    }
}

impl Drop for CompressedVectorWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close record writer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OpenMode;
    use crate::util::PointArray;
    use tempfile::NamedTempFile;

    /// Prototype {x: Float double, i: Integer [0,100], s: Scaled [0,1000] x0.1}.
    fn build(image: &mut ImageFile) -> NodeId {
        let proto = image.new_structure().unwrap();
        let x = image.new_double(0.0).unwrap();
        image.set(proto, "x", x).unwrap();
        let i = image.new_integer(0, 0, 100).unwrap();
        image.set(proto, "i", i).unwrap();
        let s = image.new_scaled_integer(0, 0, 1000, 0.1, 0.0).unwrap();
        image.set(proto, "s", s).unwrap();
        let codecs = image.new_vector(true).unwrap();
        let cv = image.new_compressed_vector(proto, codecs).unwrap();
        let root = image.root();
        image.set(root, "points", cv).unwrap();
        cv
    }

    fn buffers(x: Vec<f64>, i: Vec<u8>, s: Vec<f64>) -> Vec<SourceDestBuffer> {
        vec![
            SourceDestBuffer::new("x", PointArray::from(x), true, true).unwrap(),
            SourceDestBuffer::new("i", PointArray::from(i), true, true).unwrap(),
            SourceDestBuffer::new("s", PointArray::from(s), true, true).unwrap(),
        ]
    }

    #[test]
    fn test_write_read_chunks() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut image = ImageFile::create(temp.path()).unwrap();
            let cv = build(&mut image);
            let mut writer = image.writer(cv).unwrap();
            let bufs = buffers(vec![1.0, 2.0, 3.0], vec![10, 20, 30], vec![0.5, 1.5, 2.5]);
            writer.write(&bufs, 3).unwrap();
            writer.write(&bufs, 2).unwrap();
            writer.close().unwrap();
            drop(writer);
            assert!(matches!(image.writer(cv), Err(Error::AlreadyWritten(_))));
            image.close().unwrap();
        }

        let image = ImageFile::open(temp.path(), OpenMode::Read).unwrap();
        let cv = image.get("/points").unwrap();
        assert_eq!(image.child_count(cv).unwrap(), 5);
        assert_eq!(image.leaf_paths(cv).unwrap(), ["x", "i", "s"]);

        let mut reader = image.reader(cv).unwrap();
        assert!(matches!(image.reader(cv), Err(Error::StreamBusy(_))));

        let mut bufs = vec![
            SourceDestBuffer::zeroed("i", ScalarKind::Int32, 4, false, true).unwrap(),
            SourceDestBuffer::zeroed("s", ScalarKind::Float64, 4, false, true).unwrap(),
        ];
        assert_eq!(reader.read(&mut bufs).unwrap(), 4);
        assert_eq!(bufs[0].array().as_slice::<i32>().unwrap(), &[10, 20, 30, 10]);
        let s = bufs[1].array().as_slice::<f64>().unwrap();
        assert!((s[2] - 2.5).abs() < 1e-9);
        assert_eq!(reader.read(&mut bufs).unwrap(), 1);
        assert_eq!(bufs[0].array().as_slice::<i32>().unwrap()[0], 20);
        assert_eq!(reader.read(&mut bufs).unwrap(), 0);

        reader.seek(2).unwrap();
        assert_eq!(reader.read(&mut bufs).unwrap(), 3);
        reader.close();
        assert!(image.reader(cv).is_ok());
    }

    #[test]
    fn test_writer_buffer_rules() {
        let temp = NamedTempFile::new().unwrap();
        let mut image = ImageFile::create(temp.path()).unwrap();
        let cv = build(&mut image);
        let mut writer = image.writer(cv).unwrap();

        let mut bufs = buffers(vec![1.0], vec![1], vec![1.0]);
        bufs.pop();
        assert!(matches!(writer.write(&bufs, 1), Err(Error::MissingBuffer(p)) if p == "s"));

        let bufs = buffers(vec![1.0], vec![1], vec![1.0, 2.0]);
        assert!(matches!(writer.write(&bufs, 1), Err(Error::BufferSizeMismatch { .. })));

        let mut bufs = buffers(vec![1.0], vec![1], vec![1.0]);
        bufs.push(SourceDestBuffer::new("x", PointArray::from(vec![0.0f64]), true, true).unwrap());
        assert!(matches!(writer.write(&bufs, 1), Err(Error::DuplicateBuffer(_))));

        let mut bufs = buffers(vec![1.0], vec![1], vec![1.0]);
        bufs.push(SourceDestBuffer::new("nope", PointArray::from(vec![0.0f64]), true, true).unwrap());
        assert!(matches!(writer.write(&bufs, 1), Err(Error::PathUndefined(_))));

        let bufs = buffers(vec![1.0], vec![101], vec![1.0]);
        assert!(matches!(writer.write(&bufs, 1), Err(Error::ValueOutOfBounds { .. })));

        let bufs = vec![
            SourceDestBuffer::new("x", PointArray::from(vec![1i32]), false, true).unwrap(),
            SourceDestBuffer::new("i", PointArray::from(vec![1u8]), false, true).unwrap(),
            SourceDestBuffer::new("s", PointArray::from(vec![1.0f64]), false, true).unwrap(),
        ];
        assert!(matches!(writer.write(&bufs, 1), Err(Error::ConversionRequired(p)) if p == "x"));

        assert_eq!(writer.record_count(), 0);
    }

    #[test]
    fn test_reader_narrowing() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut image = ImageFile::create(temp.path()).unwrap();
            let cv = build(&mut image);
            let mut writer = image.writer(cv).unwrap();
            writer
                .write(&buffers(vec![300.0], vec![100], vec![0.0]), 1)
                .unwrap();
        }
        let image = ImageFile::open(temp.path(), OpenMode::Read).unwrap();
        let cv = image.get("/points").unwrap();
        let mut reader = image.reader(cv).unwrap();
        let mut bufs = vec![SourceDestBuffer::zeroed("x", ScalarKind::Uint8, 1, true, true).unwrap()];
        assert!(matches!(
            reader.read(&mut bufs),
            Err(Error::ValueNotRepresentable { .. })
        ));
    }
}
