//! LRU cache of decoded nodes keyed by page id.

use loam_common::PageId;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Bounded cache of decoded nodes with a separate dirty set.
///
/// Clean nodes live in an LRU and may be evicted silently at any time: the
/// WAL or the main file can always serve a re-read. Nodes staged by the
/// current write operation live in the dirty set, which shadows the LRU on
/// lookup and is never evicted. On commit the dirty set drains back into
/// the LRU; on abort it is dropped, letting the last committed copies
/// resurface.
///
/// The internal mutex only guards map operations; callers perform I/O
/// outside of it.
pub struct NodeCache<T> {
    inner: Mutex<CacheInner<T>>,
}

struct CacheInner<T> {
    lru: LruCache<PageId, Arc<T>>,
    dirty: HashMap<PageId, Arc<T>>,
}

impl<T> NodeCache<T> {
    /// Creates a cache bounded to `capacity` clean entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                dirty: HashMap::new(),
            }),
        }
    }

    /// Looks up a node, preferring the dirty set over the LRU.
    pub fn get(&self, page: PageId) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.dirty.get(&page) {
            return Some(Arc::clone(node));
        }
        inner.lru.get(&page).cloned()
    }

    /// Inserts a clean node, possibly evicting the least recently used one.
    pub fn insert_clean(&self, page: PageId, node: Arc<T>) {
        self.inner.lock().lru.put(page, node);
    }

    /// Stages a node in the dirty set, shadowing any clean copy.
    pub fn insert_dirty(&self, page: PageId, node: Arc<T>) {
        self.inner.lock().dirty.insert(page, node);
    }

    /// Snapshot of the dirty set, for encoding into the WAL.
    pub fn dirty_nodes(&self) -> Vec<(PageId, Arc<T>)> {
        self.inner
            .lock()
            .dirty
            .iter()
            .map(|(&page, node)| (page, Arc::clone(node)))
            .collect()
    }

    /// Moves every dirty node into the LRU as clean. Call after commit.
    pub fn flush_dirty(&self) {
        let mut inner = self.inner.lock();
        let drained: Vec<_> = inner.dirty.drain().collect();
        for (page, node) in drained {
            inner.lru.put(page, node);
        }
    }

    /// Drops the dirty set. Call after abort.
    pub fn discard_dirty(&self) {
        self.inner.lock().dirty.clear();
    }

    /// Purges a page from both the dirty set and the LRU.
    pub fn remove(&self, page: PageId) {
        let mut inner = self.inner.lock();
        inner.dirty.remove(&page);
        inner.lru.pop(&page);
    }

    /// Number of clean entries currently cached.
    pub fn clean_len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    /// Number of dirty entries currently staged.
    pub fn dirty_len(&self) -> usize {
        self.inner.lock().dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> NodeCache<String> {
        NodeCache::new(capacity)
    }

    #[test]
    fn test_get_miss() {
        let cache = cache(4);
        assert!(cache.get(PageId(1)).is_none());
    }

    #[test]
    fn test_insert_clean_and_get() {
        let cache = cache(4);
        cache.insert_clean(PageId(1), Arc::new("a".to_string()));
        assert_eq!(*cache.get(PageId(1)).unwrap(), "a");
        assert_eq!(cache.clean_len(), 1);
    }

    #[test]
    fn test_lru_evicts_oldest_clean() {
        let cache = cache(2);
        cache.insert_clean(PageId(1), Arc::new("a".to_string()));
        cache.insert_clean(PageId(2), Arc::new("b".to_string()));
        // Touch page 1 so page 2 becomes the eviction victim.
        cache.get(PageId(1));
        cache.insert_clean(PageId(3), Arc::new("c".to_string()));

        assert!(cache.get(PageId(1)).is_some());
        assert!(cache.get(PageId(2)).is_none());
        assert!(cache.get(PageId(3)).is_some());
    }

    #[test]
    fn test_dirty_shadows_clean() {
        let cache = cache(4);
        cache.insert_clean(PageId(1), Arc::new("old".to_string()));
        cache.insert_dirty(PageId(1), Arc::new("new".to_string()));
        assert_eq!(*cache.get(PageId(1)).unwrap(), "new");
    }

    #[test]
    fn test_dirty_survives_eviction_pressure() {
        let cache = cache(1);
        cache.insert_dirty(PageId(1), Arc::new("pinned".to_string()));
        for i in 2..20 {
            cache.insert_clean(PageId(i), Arc::new(format!("n{}", i)));
        }
        assert_eq!(*cache.get(PageId(1)).unwrap(), "pinned");
    }

    #[test]
    fn test_flush_dirty_moves_to_clean() {
        let cache = cache(4);
        cache.insert_dirty(PageId(1), Arc::new("a".to_string()));
        cache.insert_dirty(PageId(2), Arc::new("b".to_string()));
        assert_eq!(cache.dirty_len(), 2);

        cache.flush_dirty();
        assert_eq!(cache.dirty_len(), 0);
        assert_eq!(cache.clean_len(), 2);
        assert_eq!(*cache.get(PageId(1)).unwrap(), "a");
    }

    #[test]
    fn test_discard_dirty_resurfaces_clean_copy() {
        let cache = cache(4);
        cache.insert_clean(PageId(1), Arc::new("committed".to_string()));
        cache.insert_dirty(PageId(1), Arc::new("staged".to_string()));
        cache.discard_dirty();
        assert_eq!(*cache.get(PageId(1)).unwrap(), "committed");
    }

    #[test]
    fn test_dirty_nodes_snapshot() {
        let cache = cache(4);
        cache.insert_dirty(PageId(2), Arc::new("b".to_string()));
        cache.insert_dirty(PageId(1), Arc::new("a".to_string()));

        let mut nodes = cache.dirty_nodes();
        nodes.sort_by_key(|(page, _)| *page);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].0, PageId(1));
        assert_eq!(*nodes[1].1, "b");
    }

    #[test]
    fn test_remove_purges_both() {
        let cache = cache(4);
        cache.insert_clean(PageId(1), Arc::new("a".to_string()));
        cache.insert_dirty(PageId(1), Arc::new("b".to_string()));
        cache.remove(PageId(1));
        assert!(cache.get(PageId(1)).is_none());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = cache(0);
        cache.insert_clean(PageId(1), Arc::new("a".to_string()));
        assert!(cache.get(PageId(1)).is_some());
    }
}
