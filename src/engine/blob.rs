//! Blob payload I/O.

use tracing::trace;

use super::image::ImageFile;
use super::node::{BlobSegment, Node, NodeId};
use crate::util::{Error, Result};

fn check_range(byte_count: u64, start: u64, len: usize) -> Result<()> {
    let end = start.checked_add(len as u64);
    match end {
        Some(end) if end <= byte_count => Ok(()),
        _ => Err(Error::IndexOutOfRange {
            index: start.saturating_add(len as u64) as usize,
            count: byte_count as usize,
        }),
    }
}

impl ImageFile {
    /// Write `bytes` into the blob at byte offset `start`.
    pub fn write_blob(&mut self, blob: NodeId, bytes: &[u8], start: u64) -> Result<()> {
        self.ensure_writable()?;
        check_range(self.blob(blob)?.byte_count, start, bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        let stream = self.stream_mut()?;
        let block = stream.write_data_block_parts(&[start.to_le_bytes().as_slice(), bytes])?;
        if let Node::Blob(b) = self.node_mut(blob)? {
            b.segments.push(BlobSegment {
                start,
                len: bytes.len() as u64,
                data_pos: block + 16,
            });
        }
        trace!(start, len = bytes.len(), "wrote blob segment");
        Ok(())
    }

    /// Fill `buf` with blob bytes starting at `start`. Bytes never written
    /// read back as zero; later writes win over earlier overlapping ones.
    pub fn read_blob(&self, blob: NodeId, buf: &mut [u8], start: u64) -> Result<()> {
        let streams = self.streams()?;
        let node = self.blob(blob)?;
        check_range(node.byte_count, start, buf.len())?;

        buf.fill(0);
        let end = start + buf.len() as u64;
        for seg in &node.segments {
            let seg_end = seg.start + seg.len;
            if seg_end <= start || seg.start >= end {
                continue;
            }
            let from = seg.start.max(start);
            let to = seg_end.min(end);
            let dst = &mut buf[(from - start) as usize..(to - start) as usize];
            streams.read_into(seg.data_pos + (from - seg.start), dst)?;
        }
        Ok(())
    }
}
