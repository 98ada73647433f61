//! Output stream for archive writes.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use super::format::*;
use crate::util::Result;

/// Write buffer size.
const WRITE_BUFFER: usize = 2 << 20;

/// Append-only archive writer that tracks its own offset.
pub struct OStream {
    writer: BufWriter<File>,
    pos: u64,
}

impl OStream {
    /// Create (truncating) the file and write an unfrozen header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut stream = Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
            pos: 0,
        };
        stream.write_bytes(MAGIC)?;
        stream.write_u8(NOT_FROZEN_FLAG)?;
        stream.write_u16(CURRENT_VERSION)?;
        stream.write_u64(0)?;
        Ok(stream)
    }

    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    /// Little-endian scalar writers.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.pos += 8;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<LittleEndian>(value)?;
        self.pos += 2;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.pos += 1;
        Ok(())
    }

    /// Append a `[size][bytes]` data block, returning its position.
    pub fn write_data_block(&mut self, data: &[u8]) -> Result<u64> {
        let pos = self.pos;
        self.write_u64(data.len() as u64)?;
        self.write_bytes(data)?;
        Ok(pos)
    }

    /// Append a data block made of several parts, returning its position.
    pub fn write_data_block_parts(&mut self, parts: &[&[u8]]) -> Result<u64> {
        let pos = self.pos;
        let size: usize = parts.iter().map(|p| p.len()).sum();
        self.write_u64(size as u64)?;
        for part in parts {
            self.write_bytes(part)?;
        }
        Ok(pos)
    }

    /// Append a group table, returning its position.
    pub fn write_group(&mut self, children: &[u64]) -> Result<u64> {
        let pos = self.pos;
        self.write_u64(children.len() as u64)?;
        for &child in children {
            self.write_u64(child)?;
        }
        Ok(pos)
    }

    /// Flush, then move the write offset to `pos`.
    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        self.writer.flush()?;
        self.pos = self.writer.seek(SeekFrom::Start(pos))?;
        Ok(self.pos)
    }

    /// Patch the root position and set the frozen flag.
    pub fn finalize(&mut self, root_pos: u64) -> Result<()> {
        let end = self.pos;
        self.seek(ROOT_POS_OFFSET as u64)?;
        self.write_u64(root_pos)?;
        self.seek(FROZEN_OFFSET as u64)?;
        self.write_u8(FROZEN_FLAG)?;
        self.seek(end)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
