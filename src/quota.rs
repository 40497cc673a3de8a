//! Byte-quota ledger.
//!
//! All file-byte growth funnels through a single counter guarded by one
//! mutex. Admission is checked *before* any storage mutation: a failed
//! reservation leaves both the ledger and the namespace untouched.

use parking_lot::Mutex;

use crate::error::{FsError, FsResult};

/// Process-wide byte budget for one filesystem instance.
#[derive(Debug)]
pub struct QuotaManager {
    max_quota: u64,
    used: Mutex<u64>,
}

impl QuotaManager {
    /// Create a ledger with the given byte budget.
    pub fn new(max_quota: u64) -> Self {
        Self {
            max_quota,
            used: Mutex::new(0),
        }
    }

    /// Reserve `size` bytes, failing if the budget cannot cover them.
    ///
    /// The returned guard releases the bytes when dropped unless
    /// [`QuotaReservation::commit`] is called, so every error exit path
    /// restores the ledger without explicit bookkeeping. A zero-size
    /// reservation is a no-op.
    pub fn reserve(&self, size: u64) -> FsResult<QuotaReservation<'_>> {
        if size == 0 {
            return Ok(QuotaReservation {
                mgr: self,
                size: 0,
                committed: true,
            });
        }
        let mut used = self.used.lock();
        let available = self.max_quota.saturating_sub(*used);
        if size > available {
            return Err(FsError::QuotaExceeded {
                requested: size,
                available,
            });
        }
        *used += size;
        Ok(QuotaReservation {
            mgr: self,
            size,
            committed: false,
        })
    }

    /// Return `size` bytes to the budget, clamped at zero.
    pub fn release(&self, size: u64) {
        if size == 0 {
            return;
        }
        let mut used = self.used.lock();
        *used = used.saturating_sub(size);
    }

    /// Add to the used counter without an admission check.
    ///
    /// Only valid while the structure lock is held and after the caller
    /// has verified availability via [`QuotaManager::snapshot`]; used by
    /// the batch operations that compute their delta up front.
    pub(crate) fn force_reserve(&self, size: u64) {
        if size == 0 {
            return;
        }
        *self.used.lock() += size;
    }

    /// Atomically read `(maximum, used, free)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        let used = *self.used.lock();
        (self.max_quota, used, self.max_quota.saturating_sub(used))
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> u64 {
        *self.used.lock()
    }

    /// Bytes still available.
    pub fn free(&self) -> u64 {
        self.max_quota.saturating_sub(*self.used.lock())
    }

    /// The immutable budget.
    pub fn maximum(&self) -> u64 {
        self.max_quota
    }
}

/// Scoped reservation of quota bytes.
///
/// Dropping the guard without committing returns the bytes; committing
/// consumes the guard and leaves the bytes charged (the caller's
/// allocation now owns them).
#[must_use = "an uncommitted reservation is released on drop"]
#[derive(Debug)]
pub struct QuotaReservation<'a> {
    mgr: &'a QuotaManager,
    size: u64,
    committed: bool,
}

impl QuotaReservation<'_> {
    /// Keep the reserved bytes charged to the ledger.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for QuotaReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.mgr.release(self.size);
        }
    }
}
