//! File handles: mode-parameterized streams over a file node.
//!
//! A handle keeps its filesystem alive through the shared core and holds
//! the file's read or write lock for its whole lifetime. Dropping the
//! handle is the scope-based close; an explicit [`FileHandle::close`] is
//! available and idempotent. The standard `io::{Read, Write, Seek}`
//! traits are implemented on top of the inherent operations, with
//! filesystem errors crossing via `From<FsError> for io::Error`.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{FsError, FsResult};
use crate::fs::FsShared;
use crate::node::FileNode;
use crate::types::OpenMode;

/// An open file: cursor, mode gate, and the held lock.
pub struct FileHandle {
    shared: Arc<FsShared>,
    node: Arc<FileNode>,
    path: String,
    mode: OpenMode,
    cursor: usize,
    closed: bool,
}

impl FileHandle {
    /// Wrap an already-locked file node. The caller has acquired the
    /// read or write hold matching `mode`; the handle owns it from here.
    pub(crate) fn new(
        shared: Arc<FsShared>,
        node: Arc<FileNode>,
        path: String,
        mode: OpenMode,
    ) -> Self {
        let cursor = if mode.is_append() { node.size() } else { 0 };
        Self {
            shared,
            node,
            path,
            mode,
            cursor,
            closed: false,
        }
    }

    /// The normalized path this handle was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The mode this handle was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Whether the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether reads are permitted.
    pub fn readable(&self) -> bool {
        self.mode.readable()
    }

    /// Whether writes are permitted.
    pub fn writable(&self) -> bool {
        self.mode.writable()
    }

    /// Handles are always seekable while open.
    pub fn seekable(&self) -> bool {
        !self.closed
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.closed {
            Err(FsError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_readable(&self) -> FsResult<()> {
        if !self.mode.readable() {
            Err(FsError::unsupported(format!(
                "not readable in mode '{}'",
                self.mode
            )))
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> FsResult<()> {
        if !self.mode.writable() {
            Err(FsError::unsupported(format!(
                "not writable in mode '{}'",
                self.mode
            )))
        } else {
            Ok(())
        }
    }

    /// Read up to `size` bytes from the cursor, clamped to end-of-file.
    /// Returns an empty vector at EOF.
    pub fn read_bytes(&mut self, size: usize) -> FsResult<Vec<u8>> {
        self.ensure_open()?;
        self.ensure_readable()?;
        let data = {
            let inner = self.node.inner.read();
            let current = inner.storage.size();
            if self.cursor >= current {
                return Ok(Vec::new());
            }
            let actual = size.min(current - self.cursor);
            inner.storage.read_at(self.cursor, actual)
        };
        self.cursor += data.len();
        Ok(data)
    }

    /// Read from the cursor to end-of-file.
    pub fn read_all(&mut self) -> FsResult<Vec<u8>> {
        self.ensure_open()?;
        self.ensure_readable()?;
        let remaining = {
            let inner = self.node.inner.read();
            inner.storage.size().saturating_sub(self.cursor)
        };
        self.read_bytes(remaining)
    }

    /// Write `data` at the cursor. In append mode the cursor first
    /// re-seeks to end-of-file, overriding any intervening seek.
    pub fn write_bytes(&mut self, data: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        self.ensure_writable()?;
        let mut inner = self.node.inner.write();
        if self.mode.is_append() {
            self.cursor = inner.storage.size();
        }
        let written = inner.storage.write_at(self.cursor, data, &self.shared.quota)?;
        self.cursor += written;
        if written > 0 {
            inner.generation += 1;
            inner.modified_at = SystemTime::now();
        }
        Ok(written)
    }

    /// Resize the file. Shrinking releases quota and clamps the cursor;
    /// growing zero-fills. A no-change truncate does not bump the
    /// generation.
    pub fn truncate(&mut self, size: usize) -> FsResult<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        let mut inner = self.node.inner.write();
        let before = inner.storage.size();
        inner.storage.truncate(size, &self.shared.quota)?;
        if self.cursor > size {
            self.cursor = size;
        }
        if before != size {
            inner.generation += 1;
            inner.modified_at = SystemTime::now();
        }
        Ok(())
    }

    /// Current cursor position.
    pub fn position(&self) -> FsResult<u64> {
        self.ensure_open()?;
        Ok(self.cursor as u64)
    }

    fn do_seek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        self.ensure_open()?;
        let new_pos: i128 = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.cursor as i128 + delta as i128,
            SeekFrom::End(delta) => {
                if delta > 0 {
                    return Err(FsError::invalid_argument(
                        "seeking past end-of-file is not supported",
                    ));
                }
                self.node.size() as i128 + delta as i128
            }
        };
        if new_pos < 0 {
            return Err(FsError::invalid_argument(format!(
                "resulting cursor position {new_pos} is negative"
            )));
        }
        self.cursor = new_pos as usize;
        Ok(self.cursor as u64)
    }

    /// Release the held file lock. Idempotent; every operation after
    /// this fails with a closed-handle error.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.mode.writable() {
            self.node.lock.release_write();
        } else {
            self.node.lock.release_read();
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        // Scope exit is the documented close; the lock release must not
        // be skipped.
        self.close();
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.read_bytes(buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        Ok(())
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.do_seek(pos)?)
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("cursor", &self.cursor)
            .field("closed", &self.closed)
            .finish()
    }
}
