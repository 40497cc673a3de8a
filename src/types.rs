//! Public value types: open modes, configuration, stat results.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FsError;

/// The five supported binary open modes.
///
/// Text-like modes do not exist here; parsing anything else fails with
/// an invalid-argument error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// `rb`: read-only; the target must exist.
    Read,
    /// `wb`: write, truncating an existing target to zero.
    Write,
    /// `ab`: append; every write re-seeks to end-of-file.
    Append,
    /// `r+b`: read and modify in place; the target must exist.
    ReadWrite,
    /// `xb`: exclusive create; an existing target is an error.
    CreateNew,
}

impl OpenMode {
    /// Mode string as callers write it.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "rb",
            OpenMode::Write => "wb",
            OpenMode::Append => "ab",
            OpenMode::ReadWrite => "r+b",
            OpenMode::CreateNew => "xb",
        }
    }

    /// Whether handles in this mode may read.
    pub fn readable(&self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    /// Whether handles in this mode may write.
    pub fn writable(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// Whether writes re-seek to end-of-file first.
    pub fn is_append(&self) -> bool {
        matches!(self, OpenMode::Append)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpenMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rb" => Ok(OpenMode::Read),
            "wb" => Ok(OpenMode::Write),
            "ab" => Ok(OpenMode::Append),
            "r+b" | "rb+" => Ok(OpenMode::ReadWrite),
            "xb" => Ok(OpenMode::CreateNew),
            other => Err(FsError::invalid_argument(format!(
                "invalid mode '{other}': binary modes only (rb, wb, ab, r+b, xb)"
            ))),
        }
    }
}

/// Backend selection for newly created files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Start sequential, promote to random access on a non-tail write.
    #[default]
    Auto,
    /// Sequential only; non-tail writes fail with unsupported-operation.
    Sequential,
    /// Contiguous buffer from the start.
    RandomAccess,
}

/// Construction-time filesystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Upper bound of the quota counter, in bytes.
    pub max_quota: u64,
    /// Optional cap on total node count.
    pub max_nodes: Option<usize>,
    /// Backend for new files.
    pub default_storage: StorageKind,
    /// Byte ceiling above which a sequential file refuses promotion;
    /// `None` uses the built-in 512 MiB.
    pub promotion_hard_limit: Option<usize>,
    /// Force a per-chunk overhead constant instead of the calibrated one.
    pub chunk_overhead_override: Option<usize>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_quota: 256 * 1024 * 1024,
            max_nodes: None,
            default_storage: StorageKind::Auto,
            promotion_hard_limit: None,
            chunk_overhead_override: None,
        }
    }
}

impl FsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_quota(mut self, bytes: u64) -> Self {
        self.max_quota = bytes;
        self
    }

    pub fn with_max_nodes(mut self, nodes: usize) -> Self {
        self.max_nodes = Some(nodes);
        self
    }

    pub fn with_default_storage(mut self, kind: StorageKind) -> Self {
        self.default_storage = kind;
        self
    }

    pub fn with_promotion_hard_limit(mut self, bytes: usize) -> Self {
        self.promotion_hard_limit = Some(bytes);
        self
    }

    pub fn with_chunk_overhead(mut self, bytes: usize) -> Self {
        self.chunk_overhead_override = Some(bytes);
        self
    }
}

/// Per-open options beyond the mode.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Zero-fill the file up to this many bytes right after opening.
    pub preallocate: usize,
    /// Bound on waiting for the file lock: `None` blocks indefinitely,
    /// `Some(Duration::ZERO)` fails fast, anything else is a deadline.
    pub lock_timeout: Option<Duration>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preallocate(mut self, bytes: usize) -> Self {
        self.preallocate = bytes;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// Metadata snapshot for a single path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStat {
    /// Content length in bytes; zero for directories.
    pub size: u64,
    /// Creation time; epoch for directories.
    pub created_at: std::time::SystemTime,
    /// Last content mutation; epoch for directories.
    pub modified_at: std::time::SystemTime,
    /// Content-mutation counter; zero for directories.
    pub generation: u64,
    /// Whether the path names a directory.
    pub is_dir: bool,
}

/// Filesystem-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub free_bytes: u64,
    pub file_count: usize,
    pub dir_count: usize,
    /// Sequential-backend chunks only; promoted files contribute zero.
    pub chunk_count: usize,
    pub overhead_per_chunk_estimate: usize,
}
