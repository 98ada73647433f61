//! Bounded-memory record transfer loops.
//!
//! Readers and writers move records through buffers of a fixed capacity, so
//! peak memory depends on the chunk size and not on the scan size.

use tracing::{debug, debug_span};

use super::buffers::{make_buffers, PointData};
use super::fields::PointField;
use crate::engine::{ImageFile, NodeId, SourceDestBuffer};
use crate::util::{Error, Result};

/// Default chunk capacity in records.
pub const DEFAULT_CHUNK_SIZE: usize = 5_000_000;

/// Outcome of one streaming operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Number of chunk transfers performed.
    pub chunks: usize,
    /// Number of records moved.
    pub records: u64,
}

/// Read every record of `fields` in one transfer, buffers sized to the
/// stream's record count.
pub fn read_all(image: &ImageFile, cv: NodeId, fields: &[PointField]) -> Result<PointData> {
    let total = image.compressed_vector(cv)?.record_count;
    let capacity = usize::try_from(total)
        .map_err(|_| Error::other(format!("{total} records do not fit in memory")))?;
    let mut set = make_buffers(fields, capacity, true, true)?;

    let mut reader = image.reader(cv)?;
    let n = reader.read(set.buffers_mut())?;
    reader.close();
    if (n as u64) < total {
        return Err(Error::TruncatedStream {
            read: n as u64,
            expected: total,
        });
    }
    debug!(records = n, fields = fields.len(), "read full record stream");
    Ok(set.into_point_data(n))
}

/// Fixed-capacity chunked reader.
#[derive(Clone, Copy, Debug)]
pub struct ChunkedStreamReader {
    capacity: usize,
}

impl Default for ChunkedStreamReader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkedStreamReader {
    /// Reader moving at most `capacity` records per chunk (minimum one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stream `fields` of a compressed vector, calling `on_chunk` with the
    /// buffers and the number of records filled for every chunk.
    pub fn read<F>(&self, image: &ImageFile, cv: NodeId, fields: &[PointField], on_chunk: F) -> Result<StreamStats>
    where
        F: FnMut(&mut [SourceDestBuffer], usize) -> Result<()>,
    {
        let total = image.compressed_vector(cv)?.record_count;
        let capacity = (self.capacity as u64).min(total) as usize;
        let mut set = make_buffers(fields, capacity, true, true)?;
        Self::read_with(image, cv, set.buffers_mut(), on_chunk)
    }

    /// Stream into caller-bound buffers. The chunk capacity is the buffers'
    /// shared capacity.
    pub fn read_with<F>(
        image: &ImageFile,
        cv: NodeId,
        buffers: &mut [SourceDestBuffer],
        mut on_chunk: F,
    ) -> Result<StreamStats>
    where
        F: FnMut(&mut [SourceDestBuffer], usize) -> Result<()>,
    {
        let total = image.compressed_vector(cv)?.record_count;
        let _span = debug_span!("read_chunks", records = total).entered();

        let mut reader = image.reader(cv)?;
        let mut stats = StreamStats::default();
        while stats.records < total {
            let n = reader.read(buffers)?;
            if n == 0 {
                return Err(Error::TruncatedStream {
                    read: stats.records,
                    expected: total,
                });
            }
            on_chunk(buffers, n)?;
            stats.chunks += 1;
            stats.records += n as u64;
        }
        reader.close();

        debug!(chunks = stats.chunks, records = stats.records, "chunked read complete");
        Ok(stats)
    }
}

/// Fixed-capacity chunked writer.
#[derive(Clone, Copy, Debug)]
pub struct ChunkedStreamWriter {
    capacity: usize,
}

impl Default for ChunkedStreamWriter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkedStreamWriter {
    /// Writer moving at most `capacity` records per chunk (minimum one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write every point of `data` into an unwritten compressed vector whose
    /// prototype leaves are exactly the fields of `data`.
    ///
    /// Buffers hold `min(capacity, N)` records; N records take
    /// `ceil(N / capacity)` chunk writes and N = 0 takes none.
    pub fn write(&self, image: &mut ImageFile, cv: NodeId, data: &PointData) -> Result<StreamStats> {
        let total = data.validate()?;
        let fields: Vec<PointField> = data.fields().collect();
        let mut set = make_buffers(&fields, self.capacity.min(total), true, true)?;

        self.write_with(image, cv, set.buffers_mut(), total as u64, |buffers, start, count| {
            for (buf, field) in buffers.iter_mut().zip(&fields) {
                let src = data
                    .get(*field)
                    .ok_or_else(|| Error::MissingField(field.name().to_string()))?;
                buf.array_mut().copy_range_from(0, src, start as usize, count)?;
            }
            Ok(())
        })
    }

    /// Drive a write of `total` records through caller-bound buffers.
    /// `fill(buffers, start, count)` loads records `start..start + count`
    /// before each chunk write.
    pub fn write_with<F>(
        &self,
        image: &mut ImageFile,
        cv: NodeId,
        buffers: &mut [SourceDestBuffer],
        total: u64,
        mut fill: F,
    ) -> Result<StreamStats>
    where
        F: FnMut(&mut [SourceDestBuffer], u64, usize) -> Result<()>,
    {
        let _span = debug_span!("write_chunks", records = total, capacity = self.capacity).entered();
        let capacity = buffers
            .first()
            .map_or(self.capacity, SourceDestBuffer::capacity)
            .min(self.capacity);

        let mut writer = image.writer(cv)?;
        let mut stats = StreamStats::default();
        while stats.records < total {
            let count = (capacity as u64).min(total - stats.records) as usize;
            if count == 0 {
                return Err(Error::other("chunk buffers have zero capacity"));
            }
            fill(buffers, stats.records, count)?;
            writer.write(buffers, count)?;
            stats.chunks += 1;
            stats.records += count as u64;
        }
        writer.close()?;

        debug!(chunks = stats.chunks, records = stats.records, "chunked write complete");
        Ok(stats)
    }
}
