//! The B+tree engine and its public handle.
//!
//! All state lives behind a single `parking_lot::RwLock`: lookups and
//! scans take it shared, mutations, checkpoints and close take it
//! exclusively. Mutations stage cloned nodes in the cache's dirty set,
//! write them to the WAL at commit, and roll everything back (WAL
//! truncation, dirty-set discard, metadata restore) if anything fails
//! mid-operation.

use crate::file::FileManager;
use crate::meta::Metadata;
use crate::node::{InternalNode, LeafNode, Node, Record, Reference, ValuePayload};
use bytes::Bytes;
use loam_buffer::NodeCache;
use loam_common::{LoamError, NodeKind, PageId, Result, TreeOptions};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on descent depth; a longer path means a cycle in the file.
const MAX_DEPTH: usize = 64;

/// Engine state guarded by the tree-level lock.
pub(crate) struct TreeInner {
    pub(crate) files: FileManager,
    pub(crate) cache: NodeCache<Node>,
    pub(crate) meta: Metadata,
    pub(crate) meta_dirty: bool,
    meta_snapshot: Metadata,
    pub(crate) options: TreeOptions,
    closed: bool,
}

impl TreeInner {
    fn open(path: &Path, options: TreeOptions) -> Result<Self> {
        options.config.validate()?;
        let mut files = FileManager::open(path, options.config.page_size, options.fsync)?;
        // Recovery may have indexed committed transactions; drain them so
        // every open starts with an empty WAL.
        if files.wal_pages() > 0 {
            files.checkpoint()?;
        }

        let cache = NodeCache::new(options.cache_size);
        let meta = if files.num_pages() == 0 {
            files.begin()?;
            let meta_page = files.extend();
            debug_assert_eq!(meta_page, PageId::META);
            let root = files.extend();
            let meta = Metadata {
                config: options.config,
                root,
                freelist_head: None,
            };
            files.write_page(PageId::META, &meta.encode())?;
            files.write_page(root, &Node::Leaf(LeafNode::empty()).encode(&options.config))?;
            files.commit()?;
            files.checkpoint()?;
            debug!(path = %path.display(), "created new tree file");
            meta
        } else {
            let image = files.read_page(PageId::META)?;
            let meta = Metadata::decode(&image)?;
            meta.verify_config(&options.config)?;
            meta
        };

        Ok(Self {
            files,
            cache,
            meta,
            meta_dirty: false,
            meta_snapshot: meta,
            options,
            closed: false,
        })
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(LoamError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.meta.config.key_size as usize {
            return Err(LoamError::BadKeySize {
                size: key.len(),
                expected: self.meta.config.key_size as usize,
            });
        }
        Ok(())
    }

    /// Reads a node through the cache; misses decode from the WAL-first
    /// file manager and populate the clean side of the cache.
    pub(crate) fn fetch(&self, page: PageId) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.get(page) {
            return Ok(node);
        }
        let image = self.files.read_page(page)?;
        let node = Arc::new(Node::decode(&self.meta.config, page, &image)?);
        self.cache.insert_clean(page, Arc::clone(&node));
        Ok(node)
    }

    /// Stages a mutated node in the dirty set.
    pub(crate) fn stage(&self, page: PageId, node: Node) {
        self.cache.insert_dirty(page, Arc::new(node));
    }

    fn expect_leaf(&self, page: PageId) -> Result<LeafNode> {
        match &*self.fetch(page)? {
            Node::Leaf(leaf) => Ok(leaf.clone()),
            other => Err(unexpected_kind(page, other.kind(), "leaf")),
        }
    }

    fn expect_internal(&self, page: PageId) -> Result<InternalNode> {
        match &*self.fetch(page)? {
            Node::Internal(internal) => Ok(internal.clone()),
            other => Err(unexpected_kind(page, other.kind(), "internal")),
        }
    }

    /// Walks from the root to the leaf responsible for `key`, returning the
    /// leaf's page and the internal pages along the way.
    fn descend_to_leaf(&self, key: &[u8]) -> Result<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut page = self.meta.root;
        for _ in 0..MAX_DEPTH {
            match &*self.fetch(page)? {
                Node::Internal(internal) => {
                    path.push(page);
                    page = internal.child_for(key);
                }
                Node::Leaf(_) => return Ok((page, path)),
                other => return Err(unexpected_kind(page, other.kind(), "leaf or internal")),
            }
        }
        Err(LoamError::CorruptPage {
            page: self.meta.root.0,
            reason: format!("descent exceeded {} levels", MAX_DEPTH),
        })
    }

    /// Leftmost leaf of the tree, the start of full scans.
    pub(crate) fn leftmost_leaf(&self) -> Result<PageId> {
        let mut page = self.meta.root;
        for _ in 0..MAX_DEPTH {
            match &*self.fetch(page)? {
                Node::Internal(internal) => page = internal.leftmost,
                Node::Leaf(_) => return Ok(page),
                other => return Err(unexpected_kind(page, other.kind(), "leaf or internal")),
            }
        }
        Err(LoamError::CorruptPage {
            page: self.meta.root.0,
            reason: format!("descent exceeded {} levels", MAX_DEPTH),
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key(key)?;
        let (leaf_page, _) = self.descend_to_leaf(key)?;
        let node = self.fetch(leaf_page)?;
        let leaf = match &*node {
            Node::Leaf(leaf) => leaf,
            other => return Err(unexpected_kind(leaf_page, other.kind(), "leaf")),
        };
        match leaf.find(key) {
            Ok(idx) => Ok(Some(self.read_value(&leaf.records[idx].value)?)),
            Err(_) => Ok(None),
        }
    }

    /// Starting position of a range scan: the leaf holding `lower` (or the
    /// leftmost leaf) and the index of the first record `>= lower`.
    fn range_start(&self, lower: Option<&[u8]>) -> Result<(PageId, usize)> {
        match lower {
            Some(key) => {
                self.check_key(key)?;
                let (page, _) = self.descend_to_leaf(key)?;
                let leaf = match &*self.fetch(page)? {
                    Node::Leaf(leaf) => leaf.clone(),
                    other => return Err(unexpected_kind(page, other.kind(), "leaf")),
                };
                let idx = leaf.find(key).unwrap_or_else(|insert_at| insert_at);
                Ok((page, idx))
            }
            None => Ok((self.leftmost_leaf()?, 0)),
        }
    }

    fn count_entries(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut current = Some(self.leftmost_leaf()?);
        let mut visited = 0u64;
        let limit = self.files.num_pages() + 1;
        while let Some(page) = current {
            visited += 1;
            if visited > limit {
                return Err(LoamError::CorruptPage {
                    page: page.0,
                    reason: "leaf sibling chain cycle".to_string(),
                });
            }
            match &*self.fetch(page)? {
                Node::Leaf(leaf) => {
                    total += leaf.records.len() as u64;
                    current = leaf.next;
                }
                other => return Err(unexpected_kind(page, other.kind(), "leaf")),
            }
        }
        Ok(total)
    }

    // ---- write path -----------------------------------------------------

    fn begin_txn(&mut self) -> Result<()> {
        debug_assert_eq!(self.cache.dirty_len(), 0);
        self.files.begin()?;
        self.meta_snapshot = self.meta;
        self.meta_dirty = false;
        Ok(())
    }

    fn commit_txn(&mut self) -> Result<()> {
        if self.meta_dirty {
            let image = self.meta.encode();
            self.files.write_page(PageId::META, &image)?;
        }
        let config = self.meta.config;
        for (page, node) in self.cache.dirty_nodes() {
            let image = node.encode(&config);
            self.files.write_page(page, &image)?;
        }
        self.files.commit()?;
        self.cache.flush_dirty();
        self.meta_dirty = false;
        Ok(())
    }

    fn abort_txn(&mut self) -> Result<()> {
        self.cache.discard_dirty();
        self.meta = self.meta_snapshot;
        self.meta_dirty = false;
        self.files.rollback()
    }

    fn maybe_checkpoint(&mut self) -> Result<()> {
        let threshold = self.options.checkpoint_after;
        if threshold > 0 && self.files.wal_pages() >= threshold {
            self.files.checkpoint()?;
        }
        Ok(())
    }

    /// Runs `op` inside a WAL transaction. On any failure the WAL is
    /// truncated back to its pre-operation length and the staged state is
    /// discarded, leaving the durable tree untouched.
    fn with_txn<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.begin_txn()?;
        let result = match op(self) {
            Ok(value) => self.commit_txn().map(|()| value),
            Err(err) => Err(err),
        };
        match result {
            Ok(value) => {
                self.maybe_checkpoint()?;
                Ok(value)
            }
            Err(err) => {
                // Surface the operation's error, not the abort's.
                let _ = self.abort_txn();
                Err(err)
            }
        }
    }

    fn insert_one(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let (leaf_page, path) = self.descend_to_leaf(key)?;
        let mut leaf = self.expect_leaf(leaf_page)?;

        match leaf.find(key) {
            Ok(idx) => {
                // Overwrite: release the old chain before building the new
                // payload so its pages can be reused immediately.
                if let ValuePayload::Overflow { head, .. } = &leaf.records[idx].value {
                    let head = *head;
                    self.free_chain(head)?;
                }
                leaf.records[idx].value = self.store_value(value)?;
                self.stage(leaf_page, Node::Leaf(leaf));
                return Ok(());
            }
            Err(idx) => {
                let payload = self.store_value(value)?;
                leaf.records.insert(
                    idx,
                    Record {
                        key: Bytes::copy_from_slice(key),
                        value: payload,
                    },
                );
            }
        }

        if leaf.records.len() <= self.meta.config.leaf_capacity() {
            self.stage(leaf_page, Node::Leaf(leaf));
            return Ok(());
        }

        let new_page = self.allocate_page()?;
        let (separator, right) = leaf.split();
        leaf.next = Some(new_page);
        self.stage(leaf_page, Node::Leaf(leaf));
        self.stage(new_page, Node::Leaf(right));
        self.propagate_split(path, leaf_page, separator, new_page)
    }

    /// Pushes a new separator up the recorded path, splitting internal
    /// nodes as needed and growing a new root when the path runs out.
    fn propagate_split(
        &mut self,
        mut path: Vec<PageId>,
        mut left_page: PageId,
        mut separator: Bytes,
        mut right_page: PageId,
    ) -> Result<()> {
        while let Some(parent_page) = path.pop() {
            let mut parent = self.expect_internal(parent_page)?;
            parent.insert_ref(Reference {
                key: separator,
                child: right_page,
            });
            if parent.refs.len() <= self.meta.config.internal_capacity() {
                self.stage(parent_page, Node::Internal(parent));
                return Ok(());
            }
            let new_page = self.allocate_page()?;
            let (promoted, right) = parent.split();
            self.stage(parent_page, Node::Internal(parent));
            self.stage(new_page, Node::Internal(right));
            separator = promoted;
            left_page = parent_page;
            right_page = new_page;
        }

        // The root itself split: put a new root one level above it.
        let new_root = self.allocate_page()?;
        self.stage(
            new_root,
            Node::Internal(InternalNode {
                leftmost: left_page,
                refs: vec![Reference {
                    key: separator,
                    child: right_page,
                }],
            }),
        );
        self.meta.root = new_root;
        self.meta_dirty = true;
        debug!(root = new_root.0, "tree grew a new root");
        Ok(())
    }

    fn remove_one(&mut self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let (leaf_page, _) = self.descend_to_leaf(key)?;
        let mut leaf = self.expect_leaf(leaf_page)?;
        match leaf.find(key) {
            Ok(idx) => {
                let record = leaf.records.remove(idx);
                if let ValuePayload::Overflow { head, .. } = record.value {
                    self.free_chain(head)?;
                }
                self.stage(leaf_page, Node::Leaf(leaf));
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            debug!("tree is already closed");
            return Ok(());
        }
        self.files.checkpoint()?;
        self.files.sync_all()?;
        self.closed = true;
        Ok(())
    }
}

pub(crate) fn unexpected_kind(page: PageId, found: NodeKind, wanted: &str) -> LoamError {
    LoamError::CorruptPage {
        page: page.0,
        reason: format!("expected {} node, found {:?}", wanted, found),
    }
}

/// An on-disk B+tree mapping fixed-width byte keys to byte values.
///
/// Keys are compared lexicographically; use a [`KeySerializer`] to map
/// typed keys onto order-preserving bytes. The handle is shareable across
/// threads: reads run concurrently, writes serialize behind the tree lock.
///
/// [`KeySerializer`]: crate::serializer::KeySerializer
pub struct BPlusTree {
    pub(crate) inner: RwLock<TreeInner>,
    pub(crate) poison: Mutex<Option<&'static str>>,
}

impl BPlusTree {
    /// Opens or creates a tree file, replaying and draining the WAL.
    pub fn open(path: impl AsRef<Path>, options: TreeOptions) -> Result<Self> {
        let inner = TreeInner::open(path.as_ref(), options)?;
        Ok(Self {
            inner: RwLock::new(inner),
            poison: Mutex::new(None),
        })
    }

    pub(crate) fn check_poison(&self) -> Result<()> {
        match *self.poison.lock() {
            Some(label) => Err(LoamError::Poisoned(label)),
            None => Ok(()),
        }
    }

    /// Records fatal errors so later operations fail fast.
    pub(crate) fn note<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(err) = &result {
            if let Some(label) = err.poison_label() {
                *self.poison.lock() = Some(label);
            }
        }
        result
    }

    /// Looks up a key. Absent keys are `Ok(None)`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_poison()?;
        let inner = self.inner.read();
        inner.check_open()?;
        self.note(inner.get(key))
    }

    /// Inserts a key/value pair, overwriting any existing value.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_poison()?;
        let mut inner = self.inner.write();
        inner.check_open()?;
        let result = inner.with_txn(|tree| tree.insert_one(key, value));
        self.note(result)
    }

    /// Inserts many pairs inside a single WAL transaction.
    ///
    /// Entries may arrive in any order; when a key occurs more than once
    /// the last occurrence wins, exactly as with repeated [`insert`] calls.
    ///
    /// [`insert`]: BPlusTree::insert
    pub fn batch_insert<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.check_poison()?;
        // Drain the caller's iterator before taking the lock and opening
        // the transaction; user code must not run inside either.
        let entries: Vec<(K, V)> = entries.into_iter().collect();
        let mut inner = self.inner.write();
        inner.check_open()?;
        let result = inner.with_txn(|tree| {
            for (key, value) in &entries {
                tree.insert_one(key.as_ref(), value.as_ref())?;
            }
            Ok(())
        });
        self.note(result)
    }

    /// Removes a key, returning whether it was present.
    ///
    /// The entry is deleted from its leaf and any overflow chain is freed;
    /// leaves are never rebalanced or merged, so a heavily pruned tree
    /// keeps its shape until keys are inserted again.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.check_poison()?;
        let mut inner = self.inner.write();
        inner.check_open()?;
        let result = inner.with_txn(|tree| tree.remove_one(key));
        self.note(result)
    }

    /// Iterates entries with `lower <= key < upper` in ascending key order.
    ///
    /// The iterator holds the shared lock for its whole lifetime, so it
    /// observes a snapshot: writers block until it is dropped.
    pub fn range(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<RangeScan<'_>> {
        self.check_poison()?;
        let inner = self.inner.read();
        inner.check_open()?;
        if let Some(upper) = upper {
            self.note(inner.check_key(upper))?;
        }
        let start = inner.range_start(lower);
        let (page, idx) = self.note(start)?;
        Ok(RangeScan {
            guard: inner,
            tree: self,
            current: Some(page),
            idx,
            upper: upper.map(|u| u.to_vec()),
            done: false,
        })
    }

    /// Iterates every entry in ascending key order.
    pub fn items(&self) -> Result<RangeScan<'_>> {
        self.range(None, None)
    }

    /// Iterates every key in ascending order.
    pub fn keys(&self) -> Result<impl Iterator<Item = Result<Vec<u8>>> + '_> {
        Ok(self.items()?.map(|entry| entry.map(|(key, _)| key)))
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> Result<u64> {
        self.check_poison()?;
        let inner = self.inner.read();
        inner.check_open()?;
        self.note(inner.count_entries())
    }

    /// Whether the tree holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drains every committed WAL page into the main file and truncates
    /// the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.check_poison()?;
        let mut inner = self.inner.write();
        inner.check_open()?;
        let result = inner.files.checkpoint().map(|_| ());
        self.note(result)
    }

    /// Checkpoints, syncs both files, and marks the handle unusable.
    ///
    /// Closing twice is a no-op; every other operation on a closed tree
    /// fails with [`LoamError::Closed`].
    pub fn close(&self) -> Result<()> {
        self.check_poison()?;
        let mut inner = self.inner.write();
        let result = inner.close();
        self.note(result)
    }
}

/// Guard-holding iterator over a key range. See [`BPlusTree::range`].
pub struct RangeScan<'t> {
    guard: RwLockReadGuard<'t, TreeInner>,
    tree: &'t BPlusTree,
    current: Option<PageId>,
    idx: usize,
    upper: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for RangeScan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let page = match self.current {
                Some(page) => page,
                None => {
                    self.done = true;
                    return None;
                }
            };
            let node = match self.guard.fetch(page) {
                Ok(node) => node,
                Err(err) => return Some(Err(self.fail(err))),
            };
            let leaf = match &*node {
                Node::Leaf(leaf) => leaf,
                other => {
                    let err = unexpected_kind(page, other.kind(), "leaf");
                    return Some(Err(self.fail(err)));
                }
            };

            if self.idx >= leaf.records.len() {
                self.current = leaf.next;
                self.idx = 0;
                continue;
            }

            let record = &leaf.records[self.idx];
            if let Some(upper) = &self.upper {
                if record.key.as_ref() >= upper.as_slice() {
                    self.done = true;
                    return None;
                }
            }
            self.idx += 1;
            match self.guard.read_value(&record.value) {
                Ok(value) => return Some(Ok((record.key.to_vec(), value))),
                Err(err) => return Some(Err(self.fail(err))),
            }
        }
    }
}

impl RangeScan<'_> {
    /// Terminates the scan and records fatal errors on the owning tree.
    fn fail(&mut self, err: LoamError) -> LoamError {
        self.done = true;
        if let Some(label) = err.poison_label() {
            *self.tree.poison.lock() = Some(label);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_common::TreeConfig;
    use tempfile::tempdir;

    fn small_options() -> TreeOptions {
        TreeOptions {
            config: TreeConfig {
                page_size: 512,
                order: 4,
                key_size: 8,
                value_size: 16,
            },
            cache_size: 16,
            fsync: false,
            checkpoint_after: 0,
        }
    }

    fn key(n: u64) -> [u8; 8] {
        n.to_be_bytes()
    }

    #[test]
    fn test_get_on_empty_tree() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        assert_eq!(tree.get(&key(1)).unwrap(), None);
        assert!(tree.is_empty().unwrap());
    }

    #[test]
    fn test_insert_and_get() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        tree.insert(&key(1), b"one").unwrap();
        tree.insert(&key(2), b"two").unwrap();

        assert_eq!(tree.get(&key(1)).unwrap().unwrap(), b"one");
        assert_eq!(tree.get(&key(2)).unwrap().unwrap(), b"two");
        assert_eq!(tree.get(&key(3)).unwrap(), None);
        assert_eq!(tree.len().unwrap(), 2);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        tree.insert(&key(1), b"first").unwrap();
        tree.insert(&key(1), b"second").unwrap();

        assert_eq!(tree.get(&key(1)).unwrap().unwrap(), b"second");
        assert_eq!(tree.len().unwrap(), 1);
    }

    #[test]
    fn test_bad_key_size_rejected() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        assert!(matches!(
            tree.insert(b"short", b"v"),
            Err(LoamError::BadKeySize { size: 5, .. })
        ));
        assert!(matches!(
            tree.get(b"also short"),
            Err(LoamError::BadKeySize { .. })
        ));
    }

    #[test]
    fn test_splits_keep_all_keys_reachable() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        // order = 4: plenty of leaf and internal splits in 50 keys.
        for n in 0..50u64 {
            tree.insert(&key(n), format!("v{}", n).as_bytes()).unwrap();
        }
        for n in 0..50u64 {
            assert_eq!(
                tree.get(&key(n)).unwrap().unwrap(),
                format!("v{}", n).as_bytes()
            );
        }
        assert_eq!(tree.len().unwrap(), 50);
    }

    #[test]
    fn test_range_bounds() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        for n in [10u64, 20, 30, 40, 50] {
            tree.insert(&key(n), b"v").unwrap();
        }

        let collect = |lower: Option<u64>, upper: Option<u64>| -> Vec<u64> {
            let lower = lower.map(key);
            let upper = upper.map(key);
            tree.range(lower.as_ref().map(|k| &k[..]), upper.as_ref().map(|k| &k[..]))
                .unwrap()
                .map(|entry| u64::from_be_bytes(entry.unwrap().0.try_into().unwrap()))
                .collect()
        };

        assert_eq!(collect(None, None), vec![10, 20, 30, 40, 50]);
        // Lower bound is inclusive, upper bound exclusive.
        assert_eq!(collect(Some(20), Some(40)), vec![20, 30]);
        // Lower bound between keys starts at the next key up.
        assert_eq!(collect(Some(15), None), vec![20, 30, 40, 50]);
        assert_eq!(collect(Some(60), None), Vec::<u64>::new());
        assert_eq!(collect(None, Some(10)), Vec::<u64>::new());
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        for n in 0..10u64 {
            tree.insert(&key(n), b"v").unwrap();
        }

        assert!(tree.remove(&key(3)).unwrap());
        assert!(!tree.remove(&key(3)).unwrap());
        assert_eq!(tree.get(&key(3)).unwrap(), None);
        assert_eq!(tree.len().unwrap(), 9);
        // Neighbours are untouched.
        assert_eq!(tree.get(&key(2)).unwrap().unwrap(), b"v");
        assert_eq!(tree.get(&key(4)).unwrap().unwrap(), b"v");
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = tempdir().unwrap();
        let tree = BPlusTree::open(dir.path().join("t.db"), small_options()).unwrap();
        tree.insert(&key(1), b"v").unwrap();
        tree.close().unwrap();

        assert!(matches!(tree.get(&key(1)), Err(LoamError::Closed)));
        assert!(matches!(tree.insert(&key(2), b"v"), Err(LoamError::Closed)));
        assert!(matches!(tree.checkpoint(), Err(LoamError::Closed)));
        // Closing again is fine.
        tree.close().unwrap();
    }

    #[test]
    fn test_config_mismatch_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let tree = BPlusTree::open(&path, small_options()).unwrap();
            tree.close().unwrap();
        }

        let mut options = small_options();
        options.config.order = 8;
        assert!(matches!(
            BPlusTree::open(&path, options),
            Err(LoamError::ConfigMismatch { field: "order", .. })
        ));
    }

    #[test]
    fn test_runtime_options_may_differ_between_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let tree = BPlusTree::open(&path, small_options()).unwrap();
            tree.insert(&key(1), b"v").unwrap();
            tree.close().unwrap();
        }

        let options = TreeOptions {
            cache_size: 2,
            checkpoint_after: 5,
            ..small_options()
        };
        let tree = BPlusTree::open(&path, options).unwrap();
        assert_eq!(tree.get(&key(1)).unwrap().unwrap(), b"v");
    }

    #[test]
    fn test_tree_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BPlusTree>();
    }
}
