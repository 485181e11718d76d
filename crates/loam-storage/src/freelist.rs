//! Free-page chain management.
//!
//! A freed page is rewritten in place as a freelist node whose `next`
//! points at the previous chain head; the metadata page tracks the top of
//! the stack. Every push and pop is an ordinary page write and therefore
//! rides the same WAL transaction as the mutation that freed or consumed
//! the page, which keeps the live/free partition crash-consistent.

use crate::node::{FreelistNode, Node};
use crate::tree::TreeInner;
use loam_common::{LoamError, PageId, Result};

impl TreeInner {
    /// Takes a page id for a new node: pops the freelist if it is
    /// non-empty, otherwise extends the file.
    ///
    /// The caller must stage new content for the returned page within the
    /// same transaction; a popped page's freelist image is dropped here and
    /// never reaches the WAL on its own.
    pub(crate) fn allocate_page(&mut self) -> Result<PageId> {
        match self.meta.freelist_head {
            Some(head) => {
                let node = self.fetch(head)?;
                let free = match &*node {
                    Node::Freelist(free) => free.clone(),
                    other => {
                        return Err(LoamError::CorruptPage {
                            page: head.0,
                            reason: format!(
                                "freelist head is a {:?} node",
                                other.kind()
                            ),
                        })
                    }
                };
                self.meta.freelist_head = free.next;
                self.meta_dirty = true;
                self.cache.remove(head);
                Ok(head)
            }
            None => Ok(self.files.extend()),
        }
    }

    /// Returns an obsolete page to the freelist.
    pub(crate) fn free_page(&mut self, page: PageId) -> Result<()> {
        self.stage(
            page,
            Node::Freelist(FreelistNode {
                next: self.meta.freelist_head,
            }),
        );
        self.meta.freelist_head = Some(page);
        self.meta_dirty = true;
        Ok(())
    }

    /// Length of the freelist chain.
    pub(crate) fn free_page_count(&self) -> Result<u64> {
        let mut count = 0u64;
        let mut current = self.meta.freelist_head;
        let limit = self.files.num_pages() + 1;
        while let Some(page) = current {
            count += 1;
            if count > limit {
                return Err(LoamError::CorruptPage {
                    page: page.0,
                    reason: "freelist chain cycle".to_string(),
                });
            }
            let node = self.fetch(page)?;
            match &*node {
                Node::Freelist(free) => current = free.next,
                other => {
                    return Err(LoamError::CorruptPage {
                        page: page.0,
                        reason: format!("{:?} node linked into freelist", other.kind()),
                    })
                }
            }
        }
        Ok(count)
    }
}
