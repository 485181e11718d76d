//! Whole-tree structural verification.
//!
//! Walks every reachable page and checks the invariants the write path is
//! supposed to maintain: key ordering inside nodes, separator bounds,
//! uniform leaf depth, a consistent sibling chain, well-formed overflow
//! chains, and the live/free page partition. Used heavily by tests; also
//! works as an offline fsck for a suspect file.

use crate::node::{Node, ValuePayload};
use crate::tree::{unexpected_kind, BPlusTree, TreeInner};
use loam_common::{LoamError, PageId, Result};
use std::collections::HashSet;

/// Counters gathered by [`BPlusTree::verify_structure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, counting the root and the leaves.
    pub height: u32,
    pub leaf_nodes: u64,
    pub internal_nodes: u64,
    pub overflow_pages: u64,
    pub free_pages: u64,
    /// Total records across all leaves.
    pub entries: u64,
    /// Smallest record count over non-root leaves; `usize::MAX` when the
    /// root is the only leaf.
    pub min_leaf_entries: usize,
}

struct VerifyState {
    stats: TreeStats,
    leaf_depth: Option<u32>,
    /// Leaves in key order, for checking the sibling chain afterwards.
    leaves: Vec<PageId>,
    /// Every page accounted for so far; duplicates mean aliased pages.
    seen: HashSet<PageId>,
}

impl TreeInner {
    pub(crate) fn verify_structure(&self) -> Result<TreeStats> {
        let mut state = VerifyState {
            stats: TreeStats {
                height: 0,
                leaf_nodes: 0,
                internal_nodes: 0,
                overflow_pages: 0,
                free_pages: 0,
                entries: 0,
                min_leaf_entries: usize::MAX,
            },
            leaf_depth: None,
            leaves: Vec::new(),
            seen: HashSet::from([PageId::META]),
        };

        self.verify_node(self.meta.root, 0, None, None, &mut state)?;
        state.stats.height = state.leaf_depth.unwrap_or(0) + 1;

        // The sibling chain must mirror the in-order leaf sequence.
        for (i, &page) in state.leaves.iter().enumerate() {
            let expected_next = state.leaves.get(i + 1).copied();
            match &*self.fetch(page)? {
                Node::Leaf(leaf) => {
                    if leaf.next != expected_next {
                        return Err(corrupt(
                            page,
                            format!(
                                "sibling link points at {:?}, in-order successor is {:?}",
                                leaf.next, expected_next
                            ),
                        ));
                    }
                }
                other => return Err(unexpected_kind(page, other.kind(), "leaf")),
            }
        }

        // The freelist must be disjoint from every live page.
        let mut current = self.meta.freelist_head;
        while let Some(page) = current {
            if !state.seen.insert(page) {
                return Err(corrupt(page, "freelist page is also live".to_string()));
            }
            state.stats.free_pages += 1;
            match &*self.fetch(page)? {
                Node::Freelist(free) => current = free.next,
                other => return Err(unexpected_kind(page, other.kind(), "freelist")),
            }
        }

        // Together, live pages and free pages partition the file.
        let accounted = state.seen.len() as u64;
        if accounted != self.files.num_pages() {
            return Err(corrupt(
                self.meta.root,
                format!(
                    "{} pages accounted for, file has {}",
                    accounted,
                    self.files.num_pages()
                ),
            ));
        }

        Ok(state.stats)
    }

    fn verify_node(
        &self,
        page: PageId,
        depth: u32,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        state: &mut VerifyState,
    ) -> Result<()> {
        if !state.seen.insert(page) {
            return Err(corrupt(page, "page is referenced twice".to_string()));
        }
        let node = self.fetch(page)?;
        match &*node {
            Node::Internal(internal) => {
                state.stats.internal_nodes += 1;
                if internal.refs.is_empty() {
                    return Err(corrupt(page, "internal node without separators".to_string()));
                }
                for window in internal.refs.windows(2) {
                    if window[0].key >= window[1].key {
                        return Err(corrupt(page, "separators out of order".to_string()));
                    }
                }
                for reference in &internal.refs {
                    check_bounds(page, &reference.key, lower, upper)?;
                }

                let first = internal.refs[0].key.clone();
                self.verify_node(internal.leftmost, depth + 1, lower, Some(&first), state)?;
                for (i, reference) in internal.refs.iter().enumerate() {
                    let child_upper = match internal.refs.get(i + 1) {
                        Some(next) => Some(next.key.as_ref()),
                        None => upper,
                    };
                    self.verify_node(
                        reference.child,
                        depth + 1,
                        Some(&reference.key),
                        child_upper,
                        state,
                    )?;
                }
                Ok(())
            }
            Node::Leaf(leaf) => {
                state.stats.leaf_nodes += 1;
                state.stats.entries += leaf.records.len() as u64;
                match state.leaf_depth {
                    Some(expected) if expected != depth => {
                        return Err(corrupt(page, "leaves at different depths".to_string()))
                    }
                    None => state.leaf_depth = Some(depth),
                    _ => {}
                }
                for window in leaf.records.windows(2) {
                    if window[0].key >= window[1].key {
                        return Err(corrupt(page, "records out of order".to_string()));
                    }
                }
                for record in &leaf.records {
                    check_bounds(page, &record.key, lower, upper)?;
                    if let ValuePayload::Overflow { head, len } = &record.value {
                        self.verify_chain(*head, *len, state)?;
                    }
                }
                if page != self.meta.root {
                    state.stats.min_leaf_entries =
                        state.stats.min_leaf_entries.min(leaf.records.len());
                }
                state.leaves.push(page);
                Ok(())
            }
            other => Err(unexpected_kind(page, other.kind(), "leaf or internal")),
        }
    }

    fn verify_chain(&self, head: PageId, len: u32, state: &mut VerifyState) -> Result<()> {
        let mut current = Some(head);
        let mut total = 0usize;
        while let Some(page) = current {
            if !state.seen.insert(page) {
                return Err(corrupt(page, "overflow page is referenced twice".to_string()));
            }
            state.stats.overflow_pages += 1;
            match &*self.fetch(page)? {
                Node::Overflow(overflow) => {
                    total += overflow.slice.len();
                    current = overflow.next;
                }
                other => return Err(unexpected_kind(page, other.kind(), "overflow")),
            }
        }
        if total != len as usize {
            return Err(corrupt(
                head,
                format!("overflow chain holds {} bytes, leaf expects {}", total, len),
            ));
        }
        Ok(())
    }
}

fn check_bounds(
    page: PageId,
    key: &[u8],
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
) -> Result<()> {
    if let Some(lower) = lower {
        if key < lower {
            return Err(corrupt(page, "key below subtree lower bound".to_string()));
        }
    }
    if let Some(upper) = upper {
        if key >= upper {
            return Err(corrupt(page, "key at or above subtree upper bound".to_string()));
        }
    }
    Ok(())
}

fn corrupt(page: PageId, reason: String) -> LoamError {
    LoamError::CorruptPage {
        page: page.0,
        reason,
    }
}

impl BPlusTree {
    /// Walks the whole tree, checking structural invariants and returning
    /// page and entry counts.
    pub fn verify_structure(&self) -> Result<TreeStats> {
        self.check_poison()?;
        let inner = self.inner.read();
        inner.check_open()?;
        self.note(inner.verify_structure())
    }
}
