//! Per-file readers-writer lock.
//!
//! Multiple readers or at most one writer, with a bounded wait. The lock
//! is deliberately non-fair: a stream of readers can starve a waiting
//! writer, so callers are expected to bound holds with a timeout.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{FsError, FsResult};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

/// Condvar-based readers-writer lock with three timeout flavors:
/// `None` blocks indefinitely, `Some(Duration::ZERO)` is try-acquire,
/// and a positive duration sets a wall-clock deadline.
#[derive(Debug, Default)]
pub struct ReadWriteLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl ReadWriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared read hold; waits while a writer is held.
    pub fn acquire_read(&self, timeout: Option<Duration>) -> FsResult<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while state.writer {
            if !self.wait(&mut state, deadline) && state.writer {
                return Err(FsError::would_block(
                    "could not acquire read lock within timeout",
                ));
            }
        }
        state.readers += 1;
        Ok(())
    }

    /// Acquire the exclusive write hold; waits while anything is held.
    pub fn acquire_write(&self, timeout: Option<Duration>) -> FsResult<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while state.writer || state.readers > 0 {
            if !self.wait(&mut state, deadline) && (state.writer || state.readers > 0) {
                return Err(FsError::would_block(
                    "could not acquire write lock within timeout",
                ));
            }
        }
        state.writer = true;
        Ok(())
    }

    /// Drop a read hold; wakes waiters when the last reader leaves.
    ///
    /// Panics on a release without a matching acquire, which is always a
    /// handle-lifecycle bug.
    pub fn release_read(&self) {
        let mut state = self.state.lock();
        assert!(
            state.readers > 0,
            "release_read without a matching acquire_read"
        );
        state.readers -= 1;
        if state.readers == 0 {
            self.cond.notify_all();
        }
    }

    /// Drop the write hold and wake waiters.
    pub fn release_write(&self) {
        let mut state = self.state.lock();
        assert!(state.writer, "release_write without a matching acquire_write");
        state.writer = false;
        self.cond.notify_all();
    }

    /// Snapshot query: is any hold (read or write) currently live?
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.writer || state.readers > 0
    }

    /// Wait on the condvar; returns false when the deadline passed
    /// without a wakeup.
    fn wait(&self, state: &mut parking_lot::MutexGuard<'_, LockState>, deadline: Option<Instant>) -> bool {
        match deadline {
            None => {
                self.cond.wait(state);
                true
            }
            Some(d) => !self.cond.wait_until(state, d).timed_out(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn readers_overlap() {
        let lock = ReadWriteLock::new();
        lock.acquire_read(None).unwrap();
        lock.acquire_read(None).unwrap();
        assert!(lock.is_locked());
        lock.release_read();
        lock.release_read();
        assert!(!lock.is_locked());
    }

    #[test]
    fn writer_is_exclusive() {
        let lock = ReadWriteLock::new();
        lock.acquire_write(None).unwrap();
        assert!(lock.acquire_read(Some(Duration::ZERO)).is_err());
        assert!(lock.acquire_write(Some(Duration::ZERO)).is_err());
        lock.release_write();
        lock.acquire_read(Some(Duration::ZERO)).unwrap();
        lock.release_read();
    }

    #[test]
    fn try_acquire_write_fails_under_reader() {
        let lock = ReadWriteLock::new();
        lock.acquire_read(None).unwrap();
        match lock.acquire_write(Some(Duration::ZERO)) {
            Err(FsError::WouldBlock(_)) => {}
            other => panic!("expected WouldBlock, got {other:?}"),
        }
        lock.release_read();
    }

    #[test]
    fn timed_acquire_respects_deadline() {
        let lock = ReadWriteLock::new();
        lock.acquire_write(None).unwrap();
        let start = Instant::now();
        let res = lock.acquire_read(Some(Duration::from_millis(50)));
        assert!(res.is_err());
        assert!(start.elapsed() >= Duration::from_millis(50));
        lock.release_write();
    }

    #[test]
    fn writer_proceeds_after_readers_leave() {
        let lock = Arc::new(ReadWriteLock::new());
        lock.acquire_read(None).unwrap();

        let l2 = Arc::clone(&lock);
        let waiter = thread::spawn(move || {
            l2.acquire_write(Some(Duration::from_secs(5))).unwrap();
            l2.release_write();
        });

        thread::sleep(Duration::from_millis(20));
        lock.release_read();
        waiter.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    #[should_panic(expected = "release_read without a matching acquire_read")]
    fn unbalanced_release_panics() {
        let lock = ReadWriteLock::new();
        lock.release_read();
    }
}
