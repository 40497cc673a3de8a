//! Filesystem core: namespace operations over the node table.
//!
//! # Concurrency Model
//!
//! Three locks, acquired in strictly increasing order: the structure
//! lock (one mutex around the whole [`Namespace`]), each file's hold
//! lock, then the quota mutex as the leaf. `open` acquires the file lock
//! while still holding the structure lock, which removes the
//! path-resolution TOCTOU at the cost of a structure-lock stall when the
//! target file is write-held; callers bound that with `lock_timeout`.
//! Traversals (`walk`, `glob`, `iter_export_tree`) snapshot one
//! directory level at a time under the structure lock and are only
//! weakly consistent by contract: entries removed mid-traversal are
//! skipped, never dereferenced.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::glob::segment_match;
use crate::handle::FileHandle;
use crate::node::{FileNode, Namespace, Node, NodeId, ROOT_ID};
use crate::path::{join_child, normalize_path, split_parent};
use crate::quota::QuotaManager;
use crate::storage::{calibrate_chunk_overhead, RandomAccessStorage, SequentialStorage, Storage};
use crate::types::{FileStat, FsConfig, FsStats, OpenMode, OpenOptions, StorageKind};

/// State shared between the filesystem value and its handles.
pub(crate) struct FsShared {
    pub(crate) quota: QuotaManager,
    /// The structure lock: node table, id allocator, every child map.
    pub(crate) ns: Mutex<Namespace>,
    pub(crate) chunk_overhead: usize,
    promotion_hard_limit: Option<usize>,
    default_storage: StorageKind,
}

/// An in-process virtual filesystem with a hard byte quota.
///
/// Cloning is cheap and yields another view of the same namespace;
/// separate instances share nothing.
#[derive(Clone)]
pub struct ScratchFs {
    shared: Arc<FsShared>,
}

impl Default for ScratchFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchFs {
    /// Create a filesystem with the default configuration (256 MiB
    /// quota, auto storage).
    pub fn new() -> Self {
        Self::with_config(FsConfig::default())
    }

    /// Create a filesystem from an explicit configuration.
    pub fn with_config(config: FsConfig) -> Self {
        let chunk_overhead = config
            .chunk_overhead_override
            .unwrap_or_else(calibrate_chunk_overhead);
        Self {
            shared: Arc::new(FsShared {
                quota: QuotaManager::new(config.max_quota),
                ns: Mutex::new(Namespace::new(config.max_nodes)),
                chunk_overhead,
                promotion_hard_limit: config.promotion_hard_limit,
                default_storage: config.default_storage,
            }),
        }
    }

    fn create_storage(&self) -> Storage {
        match self.shared.default_storage {
            StorageKind::RandomAccess => Storage::RandomAccess(RandomAccessStorage::new()),
            kind => Storage::Sequential(SequentialStorage::new(
                self.shared.chunk_overhead,
                self.shared.promotion_hard_limit,
                kind == StorageKind::Auto,
            )),
        }
    }

    /// Create a file node at `npath` under its (existing) parent.
    fn create_file(&self, ns: &mut Namespace, npath: &str) -> FsResult<Arc<FileNode>> {
        let (parent_id, name) = ns.resolve_parent(npath).ok_or_else(|| {
            let (parent_path, _) = split_parent(npath);
            FsError::not_found(format!("parent directory does not exist: '{parent_path}'"))
        })?;
        let fnode = ns.alloc_file(self.create_storage())?;
        ns.dir_mut(parent_id)
            .expect("parent resolved as a directory")
            .children
            .insert(name, fnode.id);
        Ok(fnode)
    }

    /// Open a file with default options.
    pub fn open(&self, path: &str, mode: OpenMode) -> FsResult<FileHandle> {
        self.open_with(path, mode, OpenOptions::default())
    }

    /// Open a file, optionally preallocating and bounding the lock wait.
    ///
    /// The returned handle owns the file's read (`rb`) or write (other
    /// modes) lock until it is closed or dropped.
    pub fn open_with(
        &self,
        path: &str,
        mode: OpenMode,
        opts: OpenOptions,
    ) -> FsResult<FileHandle> {
        let npath = normalize_path(path)?;
        let mut ns = self.shared.ns.lock();

        let existing = match ns.resolve(&npath) {
            Some(id) => match ns.node(id) {
                Some(Node::Dir(_)) => return Err(FsError::is_a_directory(&npath)),
                Some(Node::File(f)) => Some(Arc::clone(f)),
                None => None,
            },
            None => None,
        };

        let fnode = match mode {
            OpenMode::Read => {
                let fnode = existing.ok_or_else(|| FsError::not_found(&npath))?;
                fnode.lock.acquire_read(opts.lock_timeout)?;
                fnode
            }
            OpenMode::Write => match existing {
                None => {
                    let fnode = self.create_file(&mut ns, &npath)?;
                    fnode.lock.acquire_write(opts.lock_timeout)?;
                    fnode
                }
                Some(fnode) => {
                    fnode.lock.acquire_write(opts.lock_timeout)?;
                    let mut inner = fnode.inner.write();
                    if let Err(e) = inner.storage.truncate(0, &self.shared.quota) {
                        drop(inner);
                        fnode.lock.release_write();
                        return Err(e);
                    }
                    inner.generation += 1;
                    inner.modified_at = SystemTime::now();
                    drop(inner);
                    fnode
                }
            },
            OpenMode::Append => {
                let fnode = match existing {
                    Some(f) => f,
                    None => self.create_file(&mut ns, &npath)?,
                };
                fnode.lock.acquire_write(opts.lock_timeout)?;
                fnode
            }
            OpenMode::ReadWrite => {
                let fnode = existing.ok_or_else(|| FsError::not_found(&npath))?;
                fnode.lock.acquire_write(opts.lock_timeout)?;
                fnode
            }
            OpenMode::CreateNew => {
                if existing.is_some() {
                    return Err(FsError::already_exists(&npath));
                }
                let fnode = self.create_file(&mut ns, &npath)?;
                fnode.lock.acquire_write(opts.lock_timeout)?;
                fnode
            }
        };

        let mut handle =
            FileHandle::new(Arc::clone(&self.shared), Arc::clone(&fnode), npath, mode);

        if opts.preallocate > 0 {
            let current = fnode.size();
            if opts.preallocate > current {
                let result = {
                    let mut inner = fnode.inner.write();
                    let zeros = vec![0u8; opts.preallocate - current];
                    inner
                        .storage
                        .write_at(current, &zeros, &self.shared.quota)
                        .map(|_| inner.generation += 1)
                };
                if let Err(e) = result {
                    drop(ns);
                    handle.close();
                    return Err(e);
                }
            }
        }

        Ok(handle)
    }

    /// Create the directory at `path`, including any missing ancestors.
    pub fn mkdir(&self, path: &str, exist_ok: bool) -> FsResult<()> {
        let npath = normalize_path(path)?;
        let mut ns = self.shared.ns.lock();
        if let Some(id) = ns.resolve(&npath) {
            return match ns.node(id) {
                Some(Node::Dir(_)) if exist_ok => Ok(()),
                Some(Node::Dir(_)) => Err(FsError::already_exists(format!(
                    "directory exists: '{npath}'"
                ))),
                _ => Err(FsError::already_exists(format!(
                    "file exists at path: '{npath}'"
                ))),
            };
        }
        ns.makedirs(&npath, None)?;
        Ok(())
    }

    /// Relocate `src` to `dst`. The destination must not exist and its
    /// parent must; node id, storage, timestamps, and generation travel
    /// unchanged.
    pub fn rename(&self, src: &str, dst: &str) -> FsResult<()> {
        let nsrc = normalize_path(src)?;
        let ndst = normalize_path(dst)?;
        if nsrc == "/" {
            return Err(FsError::invalid_argument("cannot rename the root directory"));
        }
        let mut ns = self.shared.ns.lock();
        let src_id = ns.resolve(&nsrc).ok_or_else(|| FsError::not_found(&nsrc))?;
        if ns.resolve(&ndst).is_some() {
            return Err(FsError::already_exists(format!(
                "destination already exists: '{ndst}'"
            )));
        }
        let (dst_parent, dst_name) = ns.resolve_parent(&ndst).ok_or_else(|| {
            FsError::not_found(format!("destination parent does not exist: '{ndst}'"))
        })?;
        assert_no_open_handles(&ns, src_id, &nsrc)?;
        let (src_parent, src_name) = ns.resolve_parent(&nsrc).expect("source resolved above");
        ns.dir_mut(src_parent)
            .expect("source parent is a directory")
            .children
            .remove(&src_name);
        ns.dir_mut(dst_parent)
            .expect("destination parent is a directory")
            .children
            .insert(dst_name, src_id);
        Ok(())
    }

    /// Like [`ScratchFs::rename`], but missing ancestors of `dst` are
    /// created first.
    pub fn move_entry(&self, src: &str, dst: &str) -> FsResult<()> {
        let nsrc = normalize_path(src)?;
        let ndst = normalize_path(dst)?;
        if nsrc == "/" {
            return Err(FsError::invalid_argument("cannot move the root directory"));
        }
        let mut ns = self.shared.ns.lock();
        let src_id = ns.resolve(&nsrc).ok_or_else(|| FsError::not_found(&nsrc))?;
        if ns.resolve(&ndst).is_some() {
            return Err(FsError::already_exists(format!(
                "destination already exists: '{ndst}'"
            )));
        }
        assert_no_open_handles(&ns, src_id, &nsrc)?;
        let (dst_parent_path, _) = split_parent(&ndst);
        if ns.resolve(dst_parent_path).is_none() {
            ns.makedirs(dst_parent_path, None)?;
        }
        let (dst_parent, dst_name) = ns.resolve_parent(&ndst).ok_or_else(|| {
            FsError::not_a_directory(format!(
                "destination parent is not a directory: '{ndst}'"
            ))
        })?;
        let (src_parent, src_name) = ns.resolve_parent(&nsrc).expect("source resolved above");
        ns.dir_mut(src_parent)
            .expect("source parent is a directory")
            .children
            .remove(&src_name);
        ns.dir_mut(dst_parent)
            .expect("destination parent is a directory")
            .children
            .insert(dst_name, src_id);
        Ok(())
    }

    /// Delete a single file. Fails on directories and on files whose
    /// lock is held by any handle.
    pub fn remove(&self, path: &str) -> FsResult<()> {
        let npath = normalize_path(path)?;
        let mut ns = self.shared.ns.lock();
        let id = ns.resolve(&npath).ok_or_else(|| FsError::not_found(&npath))?;
        let fnode = match ns.node(id) {
            Some(Node::Dir(_)) => return Err(FsError::is_a_directory(&npath)),
            Some(Node::File(f)) => Arc::clone(f),
            None => return Err(FsError::not_found(&npath)),
        };
        if fnode.lock.is_locked() {
            return Err(FsError::would_block(format!("file is open: '{npath}'")));
        }
        let usage = fnode.quota_usage();
        let (parent_id, name) = ns.resolve_parent(&npath).expect("path resolved above");
        ns.dir_mut(parent_id)
            .expect("parent is a directory")
            .children
            .remove(&name);
        ns.remove_node(id);
        self.shared.quota.release(usage as u64);
        debug!(path = %npath, released = usage, "removed file");
        Ok(())
    }

    /// Delete a directory and everything under it. Fails if any file in
    /// the subtree is lock-held, or on the root.
    pub fn rmtree(&self, path: &str) -> FsResult<()> {
        let npath = normalize_path(path)?;
        if npath == "/" {
            return Err(FsError::invalid_argument("cannot remove the root directory"));
        }
        let mut ns = self.shared.ns.lock();
        let id = ns.resolve(&npath).ok_or_else(|| FsError::not_found(&npath))?;
        if !ns.node(id).map(Node::is_dir).unwrap_or(false) {
            return Err(FsError::not_a_directory(&npath));
        }
        assert_no_open_handles(&ns, id, &npath)?;
        let released = subtree_usage(&ns, id);
        let (parent_id, name) = ns.resolve_parent(&npath).expect("path resolved above");
        ns.dir_mut(parent_id)
            .expect("parent is a directory")
            .children
            .remove(&name);
        remove_subtree(&mut ns, id);
        self.shared.quota.release(released);
        debug!(path = %npath, released, "removed directory tree");
        Ok(())
    }

    /// Names of the direct children of a directory, in unspecified order.
    pub fn listdir(&self, path: &str) -> FsResult<Vec<String>> {
        let npath = normalize_path(path)?;
        let ns = self.shared.ns.lock();
        let id = ns.resolve(&npath).ok_or_else(|| FsError::not_found(&npath))?;
        match ns.node(id) {
            Some(Node::Dir(d)) => Ok(d.children.keys().cloned().collect()),
            _ => Err(FsError::not_a_directory(&npath)),
        }
    }

    /// Whether the path resolves to anything. Traversal errors map to
    /// false.
    pub fn exists(&self, path: &str) -> bool {
        match normalize_path(path) {
            Ok(npath) => self.shared.ns.lock().resolve(&npath).is_some(),
            Err(_) => false,
        }
    }

    /// Whether the path resolves to a directory.
    pub fn is_dir(&self, path: &str) -> bool {
        match normalize_path(path) {
            Ok(npath) => {
                let ns = self.shared.ns.lock();
                ns.resolve(&npath)
                    .and_then(|id| ns.node(id))
                    .map(Node::is_dir)
                    .unwrap_or(false)
            }
            Err(_) => false,
        }
    }

    /// Whether the path resolves to a file.
    pub fn is_file(&self, path: &str) -> bool {
        match normalize_path(path) {
            Ok(npath) => {
                let ns = self.shared.ns.lock();
                matches!(
                    ns.resolve(&npath).and_then(|id| ns.node(id)),
                    Some(Node::File(_))
                )
            }
            Err(_) => false,
        }
    }

    /// Content length of a file in bytes.
    pub fn get_size(&self, path: &str) -> FsResult<u64> {
        let npath = normalize_path(path)?;
        let ns = self.shared.ns.lock();
        let id = ns.resolve(&npath).ok_or_else(|| FsError::not_found(&npath))?;
        match ns.node(id) {
            Some(Node::File(f)) => Ok(f.size() as u64),
            Some(Node::Dir(_)) => Err(FsError::is_a_directory(&npath)),
            None => Err(FsError::not_found(&npath)),
        }
    }

    /// Metadata snapshot for one path. Directories report size zero,
    /// generation zero, and epoch timestamps.
    pub fn stat(&self, path: &str) -> FsResult<FileStat> {
        let npath = normalize_path(path)?;
        let ns = self.shared.ns.lock();
        let id = ns.resolve(&npath).ok_or_else(|| FsError::not_found(&npath))?;
        match ns.node(id) {
            Some(Node::Dir(_)) => Ok(FileStat {
                size: 0,
                created_at: UNIX_EPOCH,
                modified_at: UNIX_EPOCH,
                generation: 0,
                is_dir: true,
            }),
            Some(Node::File(f)) => {
                let inner = f.inner.read();
                Ok(FileStat {
                    size: inner.storage.size() as u64,
                    created_at: f.created_at,
                    modified_at: inner.modified_at,
                    generation: inner.generation,
                    is_dir: false,
                })
            }
            None => Err(FsError::not_found(&npath)),
        }
    }

    /// Filesystem-wide counters, taken under the structure lock.
    pub fn stats(&self) -> FsStats {
        let ns = self.shared.ns.lock();
        let mut file_count = 0;
        let mut dir_count = 0;
        let mut chunk_count = 0;
        for node in ns.iter_nodes() {
            match node {
                Node::Dir(_) => dir_count += 1,
                Node::File(f) => {
                    file_count += 1;
                    chunk_count += f.inner.read().storage.chunk_count();
                }
            }
        }
        let (quota_bytes, used_bytes, free_bytes) = self.shared.quota.snapshot();
        FsStats {
            used_bytes,
            quota_bytes,
            free_bytes,
            file_count,
            dir_count,
            chunk_count,
            overhead_per_chunk_estimate: self.shared.chunk_overhead,
        }
    }

    /// Deep-copy a file's bytes into a detached in-memory reader.
    ///
    /// The copy happens under the file's read lock; the result lives
    /// outside quota accounting, so exporting a large file can consume
    /// process memory beyond the configured budget.
    pub fn export_reader(
        &self,
        path: &str,
        max_size: Option<u64>,
    ) -> FsResult<Cursor<Vec<u8>>> {
        let npath = normalize_path(path)?;
        let fnode = {
            let ns = self.shared.ns.lock();
            let id = ns.resolve(&npath).ok_or_else(|| FsError::not_found(&npath))?;
            let fnode = match ns.node(id) {
                Some(Node::File(f)) => Arc::clone(f),
                Some(Node::Dir(_)) => return Err(FsError::is_a_directory(&npath)),
                None => return Err(FsError::not_found(&npath)),
            };
            fnode
                .lock
                .acquire_read(None)
                .expect("untimed read acquisition does not time out");
            fnode
        };
        let result = (|| {
            let inner = fnode.inner.read();
            let size = inner.storage.size();
            if let Some(max) = max_size {
                if size as u64 > max {
                    return Err(FsError::invalid_argument(format!(
                        "file size {size} exceeds max_size={max}"
                    )));
                }
            }
            Ok(inner.storage.read_at(0, size))
        })();
        fnode.lock.release_read();
        result.map(Cursor::new)
    }

    /// Materialize `path → bytes` for every file under `prefix`. With
    /// `only_dirty`, only files mutated since creation are included.
    pub fn export_tree(
        &self,
        prefix: &str,
        only_dirty: bool,
    ) -> FsResult<BTreeMap<String, Vec<u8>>> {
        Ok(self.iter_export_tree(prefix, only_dirty)?.collect())
    }

    /// Lazy variant of [`ScratchFs::export_tree`]: the key set is
    /// snapshotted now, each file's bytes are read under its read lock
    /// at yield time, and concurrently removed entries are skipped.
    pub fn iter_export_tree(&self, prefix: &str, only_dirty: bool) -> FsResult<ExportIter> {
        let nprefix = normalize_path(prefix)?;
        let entries = {
            let ns = self.shared.ns.lock();
            let mut entries = Vec::new();
            if let Some(id) = ns.resolve(&nprefix) {
                collect_files(&ns, id, &nprefix, &mut entries);
            }
            if only_dirty {
                entries.retain(|(_, f)| f.inner.read().generation > 0);
            }
            entries
        };
        Ok(ExportIter {
            shared: Arc::clone(&self.shared),
            entries: entries.into_iter(),
        })
    }

    /// All-or-nothing insertion/replacement of `path → bytes`.
    ///
    /// Validation and the quota delta happen before any mutation; a
    /// failure mid-apply restores the namespace and leaves the ledger
    /// untouched.
    pub fn import_tree<I>(&self, entries: I) -> FsResult<()>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mut normalized: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (path, data) in entries {
            let npath = normalize_path(&path)?;
            if npath == "/" {
                return Err(FsError::is_a_directory("/"));
            }
            normalized.insert(npath, data);
        }
        if normalized.is_empty() {
            return Ok(());
        }

        let mut ns = self.shared.ns.lock();

        for npath in normalized.keys() {
            if let Some(id) = ns.resolve(npath) {
                if let Some(Node::File(f)) = ns.node(id) {
                    if f.lock.is_locked() {
                        return Err(FsError::would_block(format!(
                            "cannot import: file is open: '{npath}'"
                        )));
                    }
                }
            }
        }

        let mut old_quota: u64 = 0;
        let mut old_nodes: BTreeMap<String, Option<Arc<FileNode>>> = BTreeMap::new();
        for npath in normalized.keys() {
            let old = ns.resolve(npath).and_then(|id| match ns.node(id) {
                Some(Node::File(f)) => Some(Arc::clone(f)),
                _ => None,
            });
            if let Some(f) = &old {
                old_quota += f.quota_usage() as u64;
            }
            old_nodes.insert(npath.clone(), old);
        }

        let mut new_quota: u64 = 0;
        for data in normalized.values() {
            if !data.is_empty() {
                new_quota += (data.len() + self.shared.chunk_overhead) as u64;
            }
        }

        if new_quota > old_quota {
            let net = new_quota - old_quota;
            let free = self.shared.quota.free();
            if net > free {
                return Err(FsError::QuotaExceeded {
                    requested: net,
                    available: free,
                });
            }
        }

        let mut written: Vec<String> = Vec::new();
        let mut new_nodes: BTreeMap<String, Arc<FileNode>> = BTreeMap::new();
        let mut created_dirs: Vec<String> = Vec::new();

        let result = (|| -> FsResult<()> {
            for (npath, data) in &normalized {
                let (parent_path, _) = split_parent(npath);
                if ns.resolve(parent_path).is_none() {
                    ns.makedirs(parent_path, Some(&mut created_dirs))?;
                }
                let mut storage = self.create_storage();
                storage.bulk_load(data.clone());
                let fnode = ns.alloc_file(storage)?;
                let (parent_id, name) =
                    ns.resolve_parent(npath).expect("parents ensured above");
                if let Some(Some(old)) = old_nodes.get(npath) {
                    ns.remove_node(old.id);
                }
                ns.dir_mut(parent_id)
                    .expect("parent is a directory")
                    .children
                    .insert(name, fnode.id);
                new_nodes.insert(npath.clone(), fnode);
                written.push(npath.clone());
            }
            Ok(())
        })();

        if let Err(e) = result {
            warn!(error = %e, "import failed, rolling back");
            for npath in &written {
                if let Some(fnode) = new_nodes.get(npath) {
                    ns.remove_node(fnode.id);
                }
                if let Some((parent_id, name)) = ns.resolve_parent(npath) {
                    match old_nodes.get(npath) {
                        Some(Some(old)) => {
                            ns.reinsert_file(Arc::clone(old));
                            ns.dir_mut(parent_id)
                                .expect("parent is a directory")
                                .children
                                .insert(name, old.id);
                        }
                        _ => {
                            ns.dir_mut(parent_id)
                                .expect("parent is a directory")
                                .children
                                .remove(&name);
                        }
                    }
                }
            }
            rollback_created_dirs(&mut ns, &created_dirs);
            return Err(e);
        }

        if new_quota > old_quota {
            self.shared.quota.force_reserve(new_quota - old_quota);
        } else {
            self.shared.quota.release(old_quota - new_quota);
        }
        Ok(())
    }

    /// File-to-file deep byte copy. The copy is a fresh node with fresh
    /// timestamps and generation one.
    pub fn copy(&self, src: &str, dst: &str) -> FsResult<()> {
        let nsrc = normalize_path(src)?;
        let ndst = normalize_path(dst)?;
        let mut ns = self.shared.ns.lock();
        let src_id = ns.resolve(&nsrc).ok_or_else(|| FsError::not_found(&nsrc))?;
        let src_node = match ns.node(src_id) {
            Some(Node::File(f)) => Arc::clone(f),
            Some(Node::Dir(_)) => return Err(FsError::is_a_directory(&nsrc)),
            None => return Err(FsError::not_found(&nsrc)),
        };
        if ns.resolve(&ndst).is_some() {
            return Err(FsError::already_exists(format!(
                "destination already exists: '{ndst}'"
            )));
        }
        src_node
            .lock
            .acquire_read(None)
            .expect("untimed read acquisition does not time out");
        let data = {
            let inner = src_node.inner.read();
            let size = inner.storage.size();
            inner.storage.read_at(0, size)
        };
        src_node.lock.release_read();

        let fnode = self.create_file(&mut ns, &ndst)?;
        if !data.is_empty() {
            let mut inner = fnode.inner.write();
            inner.storage.write_at(0, &data, &self.shared.quota)?;
            inner.generation += 1;
        }
        Ok(())
    }

    /// Directory-to-new-directory deep copy. The quota delta for the
    /// whole subtree is checked up front and force-reserved only after
    /// the duplicate is fully built; on failure the original state is
    /// left intact.
    pub fn copy_tree(&self, src: &str, dst: &str) -> FsResult<()> {
        let nsrc = normalize_path(src)?;
        let ndst = normalize_path(dst)?;
        let mut ns = self.shared.ns.lock();
        let src_id = ns.resolve(&nsrc).ok_or_else(|| FsError::not_found(&nsrc))?;
        if !ns.node(src_id).map(Node::is_dir).unwrap_or(false) {
            return Err(FsError::not_a_directory(&nsrc));
        }
        if ns.resolve(&ndst).is_some() {
            return Err(FsError::already_exists(format!(
                "destination already exists: '{ndst}'"
            )));
        }
        let (dst_parent, dst_name) = ns.resolve_parent(&ndst).ok_or_else(|| {
            FsError::not_found(format!("destination parent does not exist: '{ndst}'"))
        })?;
        let total = self.subtree_copy_cost(&ns, src_id);
        if total > 0 {
            let free = self.shared.quota.free();
            if total > free {
                return Err(FsError::QuotaExceeded {
                    requested: total,
                    available: free,
                });
            }
        }
        let mut created: Vec<NodeId> = Vec::new();
        let new_root = match self.deep_copy_subtree(&mut ns, src_id, &mut created) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "copy_tree failed, discarding partial copy");
                for id in created.iter().rev() {
                    ns.remove_node(*id);
                }
                return Err(e);
            }
        };
        ns.dir_mut(dst_parent)
            .expect("destination parent is a directory")
            .children
            .insert(dst_name, new_root);
        if total > 0 {
            self.shared.quota.force_reserve(total);
        }
        Ok(())
    }

    /// Quota footprint the copies of this subtree will occupy.
    fn subtree_copy_cost(&self, ns: &Namespace, id: NodeId) -> u64 {
        match ns.node(id) {
            Some(Node::File(f)) => {
                let size = f.size();
                if size == 0 {
                    0
                } else {
                    (size + self.shared.chunk_overhead) as u64
                }
            }
            Some(Node::Dir(d)) => d
                .children
                .values()
                .map(|child| self.subtree_copy_cost(ns, *child))
                .sum(),
            None => 0,
        }
    }

    fn deep_copy_subtree(
        &self,
        ns: &mut Namespace,
        id: NodeId,
        created: &mut Vec<NodeId>,
    ) -> FsResult<NodeId> {
        let file = match ns.node(id) {
            Some(Node::File(f)) => Some(Arc::clone(f)),
            _ => None,
        };
        if let Some(f) = file {
            f.lock
                .acquire_read(None)
                .expect("untimed read acquisition does not time out");
            let data = {
                let inner = f.inner.read();
                let size = inner.storage.size();
                inner.storage.read_at(0, size)
            };
            f.lock.release_read();
            let mut storage = self.create_storage();
            storage.bulk_load(data);
            let fnode = ns.alloc_file(storage)?;
            created.push(fnode.id);
            return Ok(fnode.id);
        }
        let children: Vec<(String, NodeId)> = match ns.node(id) {
            Some(Node::Dir(d)) => d.children.iter().map(|(n, &c)| (n.clone(), c)).collect(),
            _ => Vec::new(),
        };
        let new_dir = ns.alloc_dir()?;
        created.push(new_dir);
        for (name, child_id) in children {
            let new_child = self.deep_copy_subtree(ns, child_id, created)?;
            ns.dir_mut(new_dir)
                .expect("freshly allocated directory")
                .children
                .insert(name, new_child);
        }
        Ok(new_dir)
    }

    /// Lazy pre-order traversal yielding one directory level per step.
    ///
    /// Each level is snapshotted under the structure lock and the lock
    /// is released for the descent; entries removed concurrently are
    /// skipped without error.
    pub fn walk(&self, path: &str) -> FsResult<Walk> {
        let npath = normalize_path(path)?;
        let ns = self.shared.ns.lock();
        let id = ns.resolve(&npath).ok_or_else(|| FsError::not_found(&npath))?;
        if !ns.node(id).map(Node::is_dir).unwrap_or(false) {
            return Err(FsError::not_a_directory(&npath));
        }
        drop(ns);
        Ok(Walk {
            shared: Arc::clone(&self.shared),
            stack: vec![(npath, id)],
        })
    }

    /// Paths matching `pattern`, sorted lexicographically.
    ///
    /// `*` and `?` match within one segment, `[set]`/`[!set]` are
    /// character classes, and `**` spans zero or more directory levels.
    /// Patterns are anchored to the root.
    pub fn glob(&self, pattern: &str) -> Vec<String> {
        let pattern = pattern.replace('\\', "/");
        let parts: Vec<&str> = pattern.split('/').filter(|p| !p.is_empty()).collect();
        let mut results = Vec::new();
        if !parts.is_empty() {
            self.glob_match(ROOT_ID, "/", &parts, 0, &mut results);
        }
        results.sort();
        results.dedup();
        results
    }

    fn snapshot_children(&self, node_id: NodeId) -> Option<Vec<(String, NodeId, bool)>> {
        let ns = self.shared.ns.lock();
        match ns.node(node_id) {
            Some(Node::Dir(d)) => Some(
                d.children
                    .iter()
                    .map(|(name, &cid)| {
                        let is_dir = ns.node(cid).map(Node::is_dir).unwrap_or(false);
                        (name.clone(), cid, is_dir)
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    fn glob_match(
        &self,
        node_id: NodeId,
        current_path: &str,
        parts: &[&str],
        idx: usize,
        results: &mut Vec<String>,
    ) {
        if idx >= parts.len() {
            return;
        }
        let Some(snapshot) = self.snapshot_children(node_id) else {
            return;
        };
        let part = parts[idx];
        let is_last = idx == parts.len() - 1;

        if part == "**" {
            // Zero-depth: try the rest of the pattern at this node, or
            // collect everything when `**` ends the pattern.
            if is_last {
                self.collect_all_paths(node_id, current_path, results);
            } else {
                self.glob_match(node_id, current_path, parts, idx + 1, results);
            }
            // One-or-more depth: recurse the `**` into subdirectories.
            for (name, child_id, is_dir) in &snapshot {
                let child_path = join_child(current_path, name);
                if *is_dir {
                    self.glob_match(*child_id, &child_path, parts, idx, results);
                } else if is_last {
                    results.push(child_path);
                } else if idx + 2 == parts.len() && segment_match(name, parts[idx + 1]) {
                    results.push(child_path);
                }
            }
        } else {
            for (name, child_id, is_dir) in &snapshot {
                if !segment_match(name, part) {
                    continue;
                }
                let child_path = join_child(current_path, name);
                if is_last {
                    results.push(child_path);
                } else if *is_dir {
                    self.glob_match(*child_id, &child_path, parts, idx + 1, results);
                }
            }
        }
    }

    fn collect_all_paths(&self, node_id: NodeId, current_path: &str, results: &mut Vec<String>) {
        let Some(snapshot) = self.snapshot_children(node_id) else {
            return;
        };
        for (name, child_id, is_dir) in snapshot {
            let child_path = join_child(current_path, &name);
            results.push(child_path.clone());
            if is_dir {
                self.collect_all_paths(child_id, &child_path, results);
            }
        }
    }
}

/// Fail with would-block if any file in the subtree has a held lock.
fn assert_no_open_handles(ns: &Namespace, id: NodeId, path: &str) -> FsResult<()> {
    match ns.node(id) {
        Some(Node::File(f)) => {
            if f.lock.is_locked() {
                Err(FsError::would_block(format!("file is open: '{path}'")))
            } else {
                Ok(())
            }
        }
        Some(Node::Dir(d)) => {
            for (name, child) in &d.children {
                assert_no_open_handles(ns, *child, &join_child(path, name))?;
            }
            Ok(())
        }
        None => Ok(()),
    }
}

/// Total quota usage of a subtree.
fn subtree_usage(ns: &Namespace, id: NodeId) -> u64 {
    match ns.node(id) {
        Some(Node::File(f)) => f.quota_usage() as u64,
        Some(Node::Dir(d)) => d.children.values().map(|c| subtree_usage(ns, *c)).sum(),
        None => 0,
    }
}

/// Drop every node in the subtree from the table.
fn remove_subtree(ns: &mut Namespace, id: NodeId) {
    let children: Vec<NodeId> = match ns.node(id) {
        Some(Node::Dir(d)) => d.children.values().copied().collect(),
        _ => Vec::new(),
    };
    for child in children {
        remove_subtree(ns, child);
    }
    ns.remove_node(id);
}

/// Collect `(path, node)` for every file under `id`, pre-order.
fn collect_files(
    ns: &Namespace,
    id: NodeId,
    path: &str,
    out: &mut Vec<(String, Arc<FileNode>)>,
) {
    match ns.node(id) {
        Some(Node::File(f)) => out.push((path.to_string(), Arc::clone(f))),
        Some(Node::Dir(d)) => {
            for (name, child) in &d.children {
                collect_files(ns, *child, &join_child(path, name), out);
            }
        }
        None => {}
    }
}

/// Unwind directories auto-created by a failed batch, innermost first,
/// skipping any that have acquired other children in the meantime.
fn rollback_created_dirs(ns: &mut Namespace, created: &[String]) {
    for dpath in created.iter().rev() {
        let Some(id) = ns.resolve(dpath) else { continue };
        let Some(dir) = ns.dir(id) else { continue };
        if !dir.children.is_empty() {
            continue;
        }
        let Some((parent_id, name)) = ns.resolve_parent(dpath) else {
            continue;
        };
        let parent = ns
            .dir_mut(parent_id)
            .expect("parent of a created directory is a directory");
        if parent.children.get(&name) == Some(&id) {
            parent.children.remove(&name);
            ns.remove_node(id);
        }
    }
}

/// One directory level yielded by [`ScratchFs::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Normalized path of the directory.
    pub path: String,
    /// Names of child directories.
    pub dirs: Vec<String>,
    /// Names of child files.
    pub files: Vec<String>,
}

/// Lazy pre-order directory traversal.
pub struct Walk {
    shared: Arc<FsShared>,
    stack: Vec<(String, NodeId)>,
}

impl Iterator for Walk {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        while let Some((path, id)) = self.stack.pop() {
            let (dirs, files, child_dirs) = {
                let ns = self.shared.ns.lock();
                let Some(Node::Dir(d)) = ns.node(id) else {
                    // Removed between levels; weak consistency says skip.
                    continue;
                };
                let mut dirs = Vec::new();
                let mut files = Vec::new();
                let mut child_dirs = Vec::new();
                for (name, &child_id) in &d.children {
                    match ns.node(child_id) {
                        Some(Node::Dir(_)) => {
                            dirs.push(name.clone());
                            child_dirs.push((join_child(&path, name), child_id));
                        }
                        Some(Node::File(_)) => files.push(name.clone()),
                        None => {}
                    }
                }
                (dirs, files, child_dirs)
            };
            for entry in child_dirs.into_iter().rev() {
                self.stack.push(entry);
            }
            return Some(WalkEntry { path, dirs, files });
        }
        None
    }
}

/// Lazy `(path, bytes)` sequence from [`ScratchFs::iter_export_tree`].
pub struct ExportIter {
    shared: Arc<FsShared>,
    entries: std::vec::IntoIter<(String, Arc<FileNode>)>,
}

impl Iterator for ExportIter {
    type Item = (String, Vec<u8>);

    fn next(&mut self) -> Option<(String, Vec<u8>)> {
        loop {
            let (path, fnode) = self.entries.next()?;
            {
                let ns = self.shared.ns.lock();
                if !ns.contains(fnode.id) {
                    continue;
                }
            }
            fnode
                .lock
                .acquire_read(None)
                .expect("untimed read acquisition does not time out");
            let data = {
                let inner = fnode.inner.read();
                let size = inner.storage.size();
                inner.storage.read_at(0, size)
            };
            fnode.lock.release_read();
            return Some((path, data));
        }
    }
}
