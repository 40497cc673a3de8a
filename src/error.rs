//! Filesystem error types.

use std::io;
use thiserror::Error;

/// Error type for all filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not resolve to a node.
    #[error("not found: {0}")]
    NotFound(String),

    /// Target of a create/rename/move already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// File operation received a directory path.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory operation received a file path, or an intermediate
    /// path segment is a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Malformed path, illegal mode, illegal seek, oversize export.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lock acquisition timed out, or fail-fast contention.
    #[error("operation would block: {0}")]
    WouldBlock(String),

    /// A write would exceed the byte quota.
    #[error("quota exceeded: requested {requested} bytes, only {available} bytes available")]
    QuotaExceeded { requested: u64, available: u64 },

    /// The node-count cap was reached. Kin of [`FsError::QuotaExceeded`];
    /// see [`FsError::is_quota`].
    #[error("node limit exceeded: {current} nodes, limit is {limit}")]
    NodeLimitExceeded { current: usize, limit: usize },

    /// Mode/capability mismatch: read on a write-only handle, non-tail
    /// write on a promotion-disabled file, promotion above the hard limit.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// I/O attempted on a closed handle.
    #[error("I/O operation on closed handle")]
    Closed,
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a WouldBlock error.
    pub fn would_block(msg: impl Into<String>) -> Self {
        Self::WouldBlock(msg.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// True for both quota-exceeded and its node-limit kin, so callers can
    /// treat "out of budget" uniformly.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. } | Self::NodeLimitExceeded { .. }
        )
    }
}

/// Convert FsError to std::io::Error so handles can speak the standard
/// `Read`/`Write`/`Seek` contract.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::WouldBlock(msg) => io::Error::new(io::ErrorKind::WouldBlock, msg),
            e @ FsError::QuotaExceeded { .. } => {
                io::Error::new(io::ErrorKind::QuotaExceeded, e.to_string())
            }
            e @ FsError::NodeLimitExceeded { .. } => {
                io::Error::new(io::ErrorKind::QuotaExceeded, e.to_string())
            }
            FsError::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            e @ FsError::Closed => io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        }
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_kinship() {
        let q = FsError::QuotaExceeded {
            requested: 10,
            available: 5,
        };
        let n = FsError::NodeLimitExceeded {
            current: 3,
            limit: 3,
        };
        assert!(q.is_quota());
        assert!(n.is_quota());
        assert!(!FsError::not_found("/x").is_quota());
    }

    #[test]
    fn io_error_mapping() {
        let e: io::Error = FsError::not_found("/missing").into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);

        let e: io::Error = FsError::would_block("/busy").into();
        assert_eq!(e.kind(), io::ErrorKind::WouldBlock);
    }
}
