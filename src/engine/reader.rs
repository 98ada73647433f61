//! Archive reader: random-access input streams and tree parsing.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use parking_lot::RwLock;

use super::format::*;
use super::node::*;
use crate::util::{Error, Result};

/// Nesting limit when parsing; deeper trees are treated as corrupt.
const MAX_DEPTH: usize = 256;

/// Random-access view of a finalized archive, mapped or behind a locked
/// file handle.
pub struct IStreams {
    inner: StreamsInner,
    version: u16,
    frozen: bool,
    size: u64,
}

enum StreamsInner {
    Mmap(Mmap),
    /// Used when mapping is disabled.
    File(RwLock<File>),
}

impl IStreams {
    /// Open `path` and validate its header.
    pub fn open(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        let size = file.metadata()?.len();
        if size < HEADER_SIZE as u64 {
            return Err(Error::UnexpectedEof(size));
        }

        let inner = if use_mmap {
            // Safety: the file is opened read-only and archives are not
            // modified once frozen.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            StreamsInner::Mmap(mmap)
        } else {
            StreamsInner::File(RwLock::new(file))
        };

        let (version, frozen) = match &inner {
            StreamsInner::Mmap(mmap) => Self::parse_header(mmap)?,
            StreamsInner::File(file) => {
                let mut f = file.write();
                let mut header = [0u8; HEADER_SIZE];
                f.seek(SeekFrom::Start(0))?;
                f.read_exact(&mut header)?;
                Self::parse_header(&header)?
            }
        };

        Ok(Self {
            inner,
            version,
            frozen,
            size,
        })
    }

    /// Parse and validate the header.
    fn parse_header(data: &[u8]) -> Result<(u16, bool)> {
        if data.len() < HEADER_SIZE {
            return Err(Error::UnexpectedEof(data.len() as u64));
        }
        if &data[0..MAGIC.len()] != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let frozen = data[FROZEN_OFFSET] == FROZEN_FLAG;
        let version = u16::from_le_bytes([data[VERSION_OFFSET], data[VERSION_OFFSET + 1]]);
        Ok((version, frozen))
    }

    /// True once the writer has finalized the file.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn root_pos(&self) -> Result<u64> {
        self.read_u64(ROOT_POS_OFFSET as u64)
    }

    /// Copy `len` bytes starting at `pos`.
    pub fn read_bytes(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(pos, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from `pos`; short files are `UnexpectedEof`.
    pub fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let end = pos
            .checked_add(buf.len() as u64)
            .ok_or(Error::UnexpectedEof(u64::MAX))?;
        if end > self.size {
            return Err(Error::UnexpectedEof(end));
        }

        match &self.inner {
            StreamsInner::Mmap(mmap) => {
                buf.copy_from_slice(&mmap[pos as usize..end as usize]);
                Ok(())
            }
            StreamsInner::File(file) => {
                let mut f = file.write();
                f.seek(SeekFrom::Start(pos))?;
                f.read_exact(buf)?;
                Ok(())
            }
        }
    }

    pub fn read_u64(&self, pos: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_into(pos, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read the child offsets of the group table at `pos`.
    pub fn read_group(&self, pos: u64) -> Result<Vec<u64>> {
        let count = self.read_u64(pos)?;
        if count > (self.size - pos) / 8 {
            return Err(Error::UnexpectedEof(pos.saturating_add(count.saturating_mul(8))));
        }
        let bytes = self.read_bytes(pos + 8, count as usize * 8)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    /// Read the payload of the data block at `pos`.
    pub fn read_data(&self, pos: u64) -> Result<Vec<u8>> {
        let size = self.read_u64(pos)?;
        if size > self.size {
            return Err(Error::UnexpectedEof(pos.saturating_add(size)));
        }
        self.read_bytes(pos + 8, size as usize)
    }
}

/// Child offset that must point at a group.
fn expect_group(offset: u64) -> Result<u64> {
    if is_group_offset(offset) {
        Ok(extract_offset(offset))
    } else {
        Err(Error::type_mismatch("group", "data"))
    }
}

/// Child offset that must point at a data block.
fn expect_data(offset: u64) -> Result<u64> {
    if is_data_offset(offset) {
        Ok(extract_offset(offset))
    } else {
        Err(Error::type_mismatch("data", "group"))
    }
}

/// Parses the on-disk tree into an arena of entries.
pub(crate) struct TreeParser<'a> {
    streams: &'a IStreams,
    entries: Vec<Entry>,
}

impl<'a> TreeParser<'a> {
    pub fn new(streams: &'a IStreams) -> Self {
        Self {
            streams,
            entries: Vec::new(),
        }
    }

    /// Parse everything reachable from the root; returns arena and root id.
    pub fn parse(mut self) -> Result<(Vec<Entry>, NodeId)> {
        let root_pos = self.streams.root_pos()?;
        if root_pos < HEADER_SIZE as u64 {
            return Err(Error::invalid("archive has no root node"));
        }
        let root = self.parse_node(root_pos, 0)?;
        if self.entries[root.0].node.kind() != NodeKind::Structure {
            return Err(Error::invalid("root node is not a structure"));
        }
        Ok((self.entries, root))
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.entries.push(Entry::detached(node));
        NodeId(self.entries.len() - 1)
    }

    fn adopt(&mut self, parent: NodeId, child: NodeId, name: String) {
        let entry = &mut self.entries[child.0];
        entry.parent = Some(parent);
        entry.name = name;
    }

    fn parse_node(&mut self, pos: u64, depth: usize) -> Result<NodeId> {
        if depth > MAX_DEPTH {
            return Err(Error::invalid("node tree nested too deeply"));
        }
        let children = self.streams.read_group(pos)?;
        let (&header_offset, rest) = children
            .split_first()
            .ok_or_else(|| Error::invalid(format!("node group at {pos} has no header")))?;
        let header = self.streams.read_data(expect_data(header_offset)?)?;
        let (&tag, mut payload) = header
            .split_first()
            .ok_or_else(|| Error::invalid(format!("empty node header at {pos}")))?;

        match tag {
            tag::INTEGER => {
                let value = payload.read_i64::<LittleEndian>()?;
                let min = payload.read_i64::<LittleEndian>()?;
                let max = payload.read_i64::<LittleEndian>()?;
                Ok(self.push(Node::Element(Element::Integer { value, min, max })))
            }
            tag::SCALED_INTEGER => {
                let raw = payload.read_i64::<LittleEndian>()?;
                let min = payload.read_i64::<LittleEndian>()?;
                let max = payload.read_i64::<LittleEndian>()?;
                let scale = payload.read_f64::<LittleEndian>()?;
                let offset = payload.read_f64::<LittleEndian>()?;
                Ok(self.push(Node::Element(Element::ScaledInteger {
                    raw,
                    min,
                    max,
                    scale,
                    offset,
                })))
            }
            tag::FLOAT => {
                let precision = match payload.read_u8()? {
                    0 => FloatPrecision::Single,
                    _ => FloatPrecision::Double,
                };
                let value = payload.read_f64::<LittleEndian>()?;
                let min = payload.read_f64::<LittleEndian>()?;
                let max = payload.read_f64::<LittleEndian>()?;
                Ok(self.push(Node::Element(Element::Float {
                    value,
                    precision,
                    min,
                    max,
                })))
            }
            tag::STRING => {
                let s = String::from_utf8(payload.to_vec())?;
                Ok(self.push(Node::Element(Element::String(s))))
            }
            tag::BLOB => {
                let byte_count = payload.read_u64::<LittleEndian>()?;
                let mut segments = Vec::with_capacity(rest.len());
                for &offset in rest {
                    let block = expect_data(offset)?;
                    let size = self.streams.read_u64(block)?;
                    if size < 8 {
                        return Err(Error::invalid("blob segment shorter than its header"));
                    }
                    let start = self.streams.read_u64(block + 8)?;
                    segments.push(BlobSegment {
                        start,
                        len: size - 8,
                        data_pos: block + 16,
                    });
                }
                Ok(self.push(Node::Blob(Blob {
                    byte_count,
                    segments,
                })))
            }
            tag::STRUCTURE => {
                if rest.len() % 2 != 0 {
                    return Err(Error::invalid("structure children are not name/node pairs"));
                }
                let mut members = Vec::with_capacity(rest.len() / 2);
                for pair in rest.chunks_exact(2) {
                    let name = String::from_utf8(self.streams.read_data(expect_data(pair[0])?)?)?;
                    let child = self.parse_node(expect_group(pair[1])?, depth + 1)?;
                    members.push((name, child));
                }
                let id = self.push(Node::Structure(Structure {
                    children: members.clone(),
                }));
                for (name, child) in members {
                    self.adopt(id, child, name);
                }
                Ok(id)
            }
            tag::VECTOR => {
                let allow_hetero = payload.read_u8()? != 0;
                let mut children = Vec::with_capacity(rest.len());
                for &offset in rest {
                    children.push(self.parse_node(expect_group(offset)?, depth + 1)?);
                }
                let id = self.push(Node::Vector(Vector {
                    allow_hetero,
                    children: children.clone(),
                }));
                for (i, child) in children.into_iter().enumerate() {
                    self.adopt(id, child, i.to_string());
                }
                Ok(id)
            }
            tag::COMPRESSED_VECTOR => {
                let record_count = payload.read_u64::<LittleEndian>()?;
                if rest.len() < 2 {
                    return Err(Error::invalid("compressed vector without prototype/codecs"));
                }
                let prototype = self.parse_node(expect_group(rest[0])?, depth + 1)?;
                let codecs = self.parse_node(expect_group(rest[1])?, depth + 1)?;
                let mut chunks = Vec::with_capacity(rest.len() - 2);
                for &offset in &rest[2..] {
                    let table = self.streams.read_group(expect_group(offset)?)?;
                    let (&count_offset, columns) = table
                        .split_first()
                        .ok_or_else(|| Error::invalid("record chunk without a count"))?;
                    let count = self.streams.read_data(expect_data(count_offset)?)?;
                    let record_count = count.as_slice().read_u64::<LittleEndian>()?;
                    let columns = columns
                        .iter()
                        .map(|&c| expect_data(c))
                        .collect::<Result<Vec<_>>>()?;
                    chunks.push(RecordChunk {
                        record_count,
                        columns,
                    });
                }
                let stored: u64 = chunks.iter().map(|c| c.record_count).sum();
                if stored != record_count {
                    return Err(Error::invalid(format!(
                        "compressed vector declares {record_count} records, chunks hold {stored}"
                    )));
                }
                let id = self.push(Node::CompressedVector(CompressedVector {
                    prototype,
                    codecs,
                    record_count,
                    chunks,
                    written: true,
                }));
                self.adopt(id, prototype, "prototype".into());
                self.adopt(id, codecs, "codecs".into());
                Ok(id)
            }
            other => Err(Error::invalid(format!("unknown node tag {other} at {pos}"))),
        }
    }
}
