//! Append-optimized chunked storage.

use crate::error::{FsError, FsResult};
use crate::quota::QuotaManager;

use super::{RandomAccessStorage, WriteOutcome, DEFAULT_PROMOTION_HARD_LIMIT};

/// Ordered chunk list with a prefix-sum index.
///
/// Chunks are never mutated in place; a write at the current end appends
/// a new chunk, and any other write promotes the whole file to
/// [`RandomAccessStorage`]. Random reads locate the starting chunk by
/// binary search over the cumulative end positions, O(log N + output).
#[derive(Debug)]
pub(crate) struct SequentialStorage {
    chunks: Vec<Vec<u8>>,
    /// Cumulative chunk end positions; last entry always equals `size`.
    cumulative: Vec<usize>,
    size: usize,
    chunk_overhead: usize,
    promotion_hard_limit: usize,
    allow_promotion: bool,
}

impl SequentialStorage {
    pub fn new(
        chunk_overhead: usize,
        promotion_hard_limit: Option<usize>,
        allow_promotion: bool,
    ) -> Self {
        Self {
            chunks: Vec::new(),
            cumulative: Vec::new(),
            size: 0,
            chunk_overhead,
            promotion_hard_limit: promotion_hard_limit.unwrap_or(DEFAULT_PROMOTION_HARD_LIMIT),
            allow_promotion,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn quota_usage(&self) -> usize {
        self.size + self.chunks.len() * self.chunk_overhead
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn read_at(&self, offset: usize, size: usize) -> Vec<u8> {
        if offset >= self.size || size == 0 {
            return Vec::new();
        }
        let end = offset.saturating_add(size).min(self.size);
        // First chunk whose end position lies beyond the offset.
        let start_idx = self.cumulative.partition_point(|&c| c <= offset);
        let mut result = Vec::with_capacity(end - offset);
        for i in start_idx..self.chunks.len() {
            let chunk_start = if i > 0 { self.cumulative[i - 1] } else { 0 };
            let chunk_end = self.cumulative[i];
            let lo = offset.max(chunk_start) - chunk_start;
            let hi = end.min(chunk_end) - chunk_start;
            result.extend_from_slice(&self.chunks[i][lo..hi]);
            if chunk_end >= end {
                break;
            }
        }
        result
    }

    pub fn write_at(
        &mut self,
        offset: usize,
        data: &[u8],
        quota: &QuotaManager,
    ) -> FsResult<WriteOutcome> {
        if offset != self.size {
            if !self.allow_promotion {
                return Err(FsError::unsupported(
                    "random-access write on a sequential-only file",
                ));
            }
            return self.promote_and_write(offset, data, quota);
        }
        let n = data.len();
        if n == 0 {
            return Ok(WriteOutcome::plain(0));
        }
        let reservation = quota.reserve((n + self.chunk_overhead) as u64)?;
        self.chunks.push(data.to_vec());
        self.size += n;
        self.cumulative.push(self.size);
        reservation.commit();
        Ok(WriteOutcome::plain(n))
    }

    pub fn truncate(&mut self, size: usize, quota: &QuotaManager) -> FsResult<()> {
        if size == self.size {
            return Ok(());
        }
        if size > self.size {
            // Grow with a single zero-filled tail chunk.
            let pad = size - self.size;
            let reservation = quota.reserve((pad + self.chunk_overhead) as u64)?;
            self.chunks.push(vec![0; pad]);
            self.size = size;
            self.cumulative.push(size);
            reservation.commit();
            return Ok(());
        }
        // Shrink: re-chunk the surviving prefix into a single slice and
        // hand back both the byte delta and the overhead delta.
        let data = self.read_at(0, size);
        let old_overhead = self.chunks.len() * self.chunk_overhead;
        if data.is_empty() {
            self.chunks.clear();
            self.cumulative.clear();
        } else {
            self.chunks = vec![data];
            self.cumulative = vec![size];
        }
        let new_overhead = self.chunks.len() * self.chunk_overhead;
        quota.release(((self.size - size) + (old_overhead - new_overhead)) as u64);
        self.size = size;
        Ok(())
    }

    pub fn bulk_load(&mut self, data: Vec<u8>) {
        if data.is_empty() {
            self.chunks.clear();
            self.cumulative.clear();
            self.size = 0;
        } else {
            self.size = data.len();
            self.cumulative = vec![data.len()];
            self.chunks = vec![data];
        }
    }

    /// Convert to a contiguous buffer and forward the non-tail write.
    ///
    /// The new buffer is reserved up front, so the promoted file is
    /// briefly double-accounted; the caller releases the displaced
    /// footprint once the replacement is installed. On any failure the
    /// sequential state and the ledger are left untouched.
    fn promote_and_write(
        &mut self,
        offset: usize,
        data: &[u8],
        quota: &QuotaManager,
    ) -> FsResult<WriteOutcome> {
        let current_size = self.size;
        if current_size > self.promotion_hard_limit {
            return Err(FsError::unsupported(format!(
                "cannot promote sequential file: size {current_size} exceeds hard limit {}",
                self.promotion_hard_limit
            )));
        }
        let reservation = quota.reserve(current_size as u64)?;
        let mut promoted = RandomAccessStorage::from_buf(self.read_at(0, current_size));
        let written = promoted.write_at(offset, data, quota)?;
        reservation.commit();
        quota.release((self.chunks.len() * self.chunk_overhead) as u64);
        Ok(WriteOutcome {
            written,
            promoted: Some(promoted),
            displaced: current_size,
        })
    }
}
