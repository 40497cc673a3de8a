//! In-process virtual filesystem with a hard byte quota.
//!
//! A hierarchical, POSIX-flavored namespace of byte-oriented files backed
//! entirely by process memory, built for bounded scratch workspaces:
//! staging areas for ETL pipelines, archive unpack/repack in sandboxes,
//! snapshot containers, temporary namespaces where an OS-level RAM disk
//! is unavailable.
//!
//! # Architecture
//!
//! - **Namespace**: a rooted tree of directory/file nodes indexed by id,
//!   guarded by a single structure lock. Paths are a derived view; every
//!   lookup walks from the root.
//! - **Quota ledger**: one counter behind one mutex; every byte of file
//!   growth is admitted there *before* any allocation, and batch
//!   operations ([`ScratchFs::import_tree`], [`ScratchFs::copy_tree`])
//!   settle their delta all-or-nothing.
//! - **Adaptive storage**: new files start as an append-optimized chunk
//!   list; the first non-tail write promotes them to a contiguous
//!   buffer. Truncating a promoted file far enough shrinks its backing
//!   allocation.
//! - **Handles**: [`ScratchFs::open`] returns a [`FileHandle`] holding
//!   the file's read or write lock for its whole lifetime and speaking
//!   the standard `io::{Read, Write, Seek}` contract.
//!
//! Traversals (`walk`, `glob`, `iter_export_tree`) are weakly
//! consistent: they snapshot one directory level at a time and skip
//! entries removed mid-flight, by contract.
//!
//! # Example
//!
//! ```
//! use scratchfs::{OpenMode, ScratchFs};
//! use std::io::Read;
//!
//! let fs = ScratchFs::new();
//! fs.mkdir("/staging", false).unwrap();
//!
//! let mut f = fs.open("/staging/data.bin", OpenMode::Write).unwrap();
//! f.write_bytes(b"payload").unwrap();
//! drop(f);
//!
//! let mut out = String::new();
//! let mut f = fs.open("/staging/data.bin", OpenMode::Read).unwrap();
//! f.read_to_string(&mut out).unwrap();
//! assert_eq!(out, "payload");
//! ```

mod error;
mod fs;
mod glob;
mod handle;
mod lock;
mod node;
mod path;
mod quota;
mod storage;
mod types;

pub use error::{FsError, FsResult};
pub use fs::{ExportIter, ScratchFs, Walk, WalkEntry};
pub use handle::FileHandle;
pub use lock::ReadWriteLock;
pub use path::normalize_path;
pub use quota::{QuotaManager, QuotaReservation};
pub use types::{FileStat, FsConfig, FsStats, OpenMode, OpenOptions, StorageKind};
