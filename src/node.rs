//! Node graph: the id-indexed table behind the structure lock.
//!
//! Identity is the node id; paths are a derived view resolved by walking
//! the child-name maps from the root on every lookup. There is no
//! path-keyed cache, which keeps rename and move O(depth).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{FsError, FsResult};
use crate::lock::ReadWriteLock;
use crate::storage::Storage;

pub(crate) type NodeId = u64;

pub(crate) const ROOT_ID: NodeId = 0;

/// Directory payload: just the name → child-id map.
#[derive(Debug, Default)]
pub(crate) struct DirNode {
    pub children: HashMap<String, NodeId>,
}

/// Mutable file payload, guarded by the short-term data lock.
#[derive(Debug)]
pub(crate) struct FileInner {
    pub storage: Storage,
    pub generation: u64,
    pub modified_at: SystemTime,
}

/// A file node. The hold lock expresses handle-lifetime ownership with
/// timeouts; the data lock serializes individual storage accesses.
#[derive(Debug)]
pub(crate) struct FileNode {
    pub id: NodeId,
    pub lock: ReadWriteLock,
    pub created_at: SystemTime,
    pub inner: RwLock<FileInner>,
}

impl FileNode {
    fn new(id: NodeId, storage: Storage) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            lock: ReadWriteLock::new(),
            created_at: now,
            inner: RwLock::new(FileInner {
                storage,
                generation: 0,
                modified_at: now,
            }),
        }
    }

    /// Current content size.
    pub fn size(&self) -> usize {
        self.inner.read().storage.size()
    }

    /// Bytes accounted to the quota ledger for this node.
    pub fn quota_usage(&self) -> usize {
        self.inner.read().storage.quota_usage()
    }
}

/// One namespace entry: a directory or a file.
///
/// Files are `Arc`-shared so handles can reach storage without holding
/// the structure lock; directories never leave the table.
#[derive(Debug)]
pub(crate) enum Node {
    Dir(DirNode),
    File(Arc<FileNode>),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }
}

/// The node table plus the id allocator; everything in here is protected
/// by the structure lock around the whole value.
#[derive(Debug)]
pub(crate) struct Namespace {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
    max_nodes: Option<usize>,
}

impl Namespace {
    pub fn new(max_nodes: Option<usize>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, Node::Dir(DirNode::default()));
        Self {
            nodes,
            next_id: ROOT_ID + 1,
            max_nodes,
        }
    }

    fn check_node_limit(&self) -> FsResult<()> {
        if let Some(limit) = self.max_nodes {
            if self.nodes.len() >= limit {
                return Err(FsError::NodeLimitExceeded {
                    current: self.nodes.len(),
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Allocate an empty directory node.
    pub fn alloc_dir(&mut self) -> FsResult<NodeId> {
        self.check_node_limit()?;
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, Node::Dir(DirNode::default()));
        Ok(id)
    }

    /// Allocate a file node owning `storage`.
    pub fn alloc_file(&mut self, storage: Storage) -> FsResult<Arc<FileNode>> {
        self.check_node_limit()?;
        let id = self.next_id;
        self.next_id += 1;
        let node = Arc::new(FileNode::new(id, storage));
        self.nodes.insert(id, Node::File(Arc::clone(&node)));
        Ok(node)
    }

    /// Re-insert a previously detached file node (batch rollback).
    pub fn reinsert_file(&mut self, node: Arc<FileNode>) {
        self.nodes.insert(node.id, Node::File(node));
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn dir(&self, id: NodeId) -> Option<&DirNode> {
        match self.nodes.get(&id) {
            Some(Node::Dir(d)) => Some(d),
            _ => None,
        }
    }

    pub fn dir_mut(&mut self, id: NodeId) -> Option<&mut DirNode> {
        match self.nodes.get_mut(&id) {
            Some(Node::Dir(d)) => Some(d),
            _ => None,
        }
    }

    /// Walk a normalized path from the root. An intermediate file
    /// segment resolves to nothing, same as a missing entry.
    pub fn resolve(&self, npath: &str) -> Option<NodeId> {
        if npath == "/" {
            return Some(ROOT_ID);
        }
        let mut current = ROOT_ID;
        for part in npath.split('/').filter(|p| !p.is_empty()) {
            let dir = self.dir(current)?;
            current = *dir.children.get(part)?;
        }
        Some(current)
    }

    /// Resolve a path's parent directory and final name. Returns nothing
    /// if the parent is missing or not a directory.
    pub fn resolve_parent(&self, npath: &str) -> Option<(NodeId, String)> {
        let (parent_path, name) = crate::path::split_parent(npath);
        let parent_id = self.resolve(parent_path)?;
        self.dir(parent_id)?;
        Some((parent_id, name.to_string()))
    }

    /// Create `npath` and any missing ancestors as directories.
    ///
    /// Paths of directories created along the way are appended to
    /// `created`, innermost last, so a batch failure can unwind them.
    pub fn makedirs(
        &mut self,
        npath: &str,
        mut created: Option<&mut Vec<String>>,
    ) -> FsResult<NodeId> {
        let mut current = ROOT_ID;
        let mut current_path = String::new();
        for part in npath.split('/').filter(|p| !p.is_empty()) {
            current_path.push('/');
            current_path.push_str(part);
            let existing = self
                .dir(current)
                .expect("makedirs cursor is always a directory")
                .children
                .get(part)
                .copied();
            match existing {
                Some(child_id) => match self.node(child_id) {
                    Some(Node::Dir(_)) => current = child_id,
                    _ => {
                        return Err(FsError::already_exists(format!(
                            "a file exists at path component: '{current_path}'"
                        )))
                    }
                },
                None => {
                    let new_dir = self.alloc_dir()?;
                    self.dir_mut(current)
                        .expect("makedirs cursor is always a directory")
                        .children
                        .insert(part.to_string(), new_dir);
                    current = new_dir;
                    if let Some(list) = &mut created {
                        list.push(current_path.clone());
                    }
                }
            }
        }
        Ok(current)
    }
}
