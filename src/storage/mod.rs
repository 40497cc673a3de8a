//! File storage backends.
//!
//! Every file node owns exactly one backend: the append-optimized chunked
//! store, or the contiguous random-access store it can promote into. The
//! two are dispatched through [`Storage`], a tagged union rather than a
//! trait object, so the promotion transition stays an explicit value swap
//! observable through `stats()`.

mod random_access;
mod sequential;

pub(crate) use random_access::RandomAccessStorage;
pub(crate) use sequential::SequentialStorage;

use crate::error::FsResult;
use crate::quota::QuotaManager;

/// Built-in ceiling above which a sequential file refuses promotion.
pub(crate) const DEFAULT_PROMOTION_HARD_LIMIT: usize = 512 * 1024 * 1024;

/// Conservative per-chunk quota surcharge.
///
/// Each chunk costs one `Vec<u8>` slot in the chunk list plus one `usize`
/// slot in the prefix-sum array; the ×1.5 + 32 margin leaves room for
/// allocator bookkeeping. Over-estimation is preferred to under.
pub(crate) fn calibrate_chunk_overhead() -> usize {
    let slot = std::mem::size_of::<Vec<u8>>() + std::mem::size_of::<usize>();
    slot + slot / 2 + 32
}

/// Result of a write against the sequential backend.
#[derive(Debug)]
pub(crate) struct WriteOutcome {
    /// Bytes written.
    pub written: usize,
    /// Replacement backend when the write triggered promotion.
    pub promoted: Option<RandomAccessStorage>,
    /// Quota bytes still accounted to the displaced sequential storage,
    /// to be released once the replacement is installed.
    pub displaced: usize,
}

impl WriteOutcome {
    fn plain(written: usize) -> Self {
        Self {
            written,
            promoted: None,
            displaced: 0,
        }
    }
}

/// A file node's storage, one of two concrete variants.
#[derive(Debug)]
pub(crate) enum Storage {
    Sequential(SequentialStorage),
    RandomAccess(RandomAccessStorage),
}

impl Storage {
    /// Read up to `size` bytes starting at `offset`, clamped to
    /// end-of-data.
    pub fn read_at(&self, offset: usize, size: usize) -> Vec<u8> {
        match self {
            Storage::Sequential(s) => s.read_at(offset, size),
            Storage::RandomAccess(r) => r.read_at(offset, size),
        }
    }

    /// Write `data` at `offset`, reserving quota for any growth.
    ///
    /// A non-tail write on a promotable sequential backend replaces the
    /// variant in place and settles the displaced footprint with the
    /// ledger.
    pub fn write_at(
        &mut self,
        offset: usize,
        data: &[u8],
        quota: &QuotaManager,
    ) -> FsResult<usize> {
        match self {
            Storage::Sequential(s) => {
                let outcome = s.write_at(offset, data, quota)?;
                let written = outcome.written;
                if let Some(promoted) = outcome.promoted {
                    let displaced = outcome.displaced;
                    *self = Storage::RandomAccess(promoted);
                    quota.release(displaced as u64);
                    tracing::debug!(displaced, "promoted sequential file to random access");
                }
                Ok(written)
            }
            Storage::RandomAccess(r) => r.write_at(offset, data, quota),
        }
    }

    /// Resize to `size`, releasing or reserving the byte delta.
    pub fn truncate(&mut self, size: usize, quota: &QuotaManager) -> FsResult<()> {
        match self {
            Storage::Sequential(s) => s.truncate(size, quota),
            Storage::RandomAccess(r) => r.truncate(size, quota),
        }
    }

    /// Current content length in bytes.
    pub fn size(&self) -> usize {
        match self {
            Storage::Sequential(s) => s.size(),
            Storage::RandomAccess(r) => r.size(),
        }
    }

    /// Bytes this storage accounts for in the quota ledger.
    pub fn quota_usage(&self) -> usize {
        match self {
            Storage::Sequential(s) => s.quota_usage(),
            Storage::RandomAccess(r) => r.quota_usage(),
        }
    }

    /// Load content directly, bypassing the ledger. Only for batch
    /// operations that have already settled quota for the whole batch.
    pub fn bulk_load(&mut self, data: Vec<u8>) {
        match self {
            Storage::Sequential(s) => s.bulk_load(data),
            Storage::RandomAccess(r) => r.bulk_load(data),
        }
    }

    /// Number of chunks held; zero for the random-access variant.
    pub fn chunk_count(&self) -> usize {
        match self {
            Storage::Sequential(s) => s.chunk_count(),
            Storage::RandomAccess(_) => 0,
        }
    }
}
