//! Overflow chains for values longer than the inline limit.

use crate::node::{Node, OverflowNode, ValuePayload};
use crate::tree::TreeInner;
use bytes::Bytes;
use loam_common::{LoamError, PageId, Result};

impl TreeInner {
    /// Builds the payload for a value: inline when it fits, otherwise an
    /// overflow chain of freshly allocated pages.
    pub(crate) fn store_value(&mut self, value: &[u8]) -> Result<ValuePayload> {
        if value.len() <= self.meta.config.value_size as usize {
            return Ok(ValuePayload::Inline(Bytes::copy_from_slice(value)));
        }
        if value.len() > u32::MAX as usize {
            return Err(LoamError::ValueTooLarge {
                size: value.len(),
                max: u32::MAX as usize,
            });
        }

        let capacity = self.meta.config.overflow_capacity();
        let chunks: Vec<&[u8]> = value.chunks(capacity).collect();
        let mut pages = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            pages.push(self.allocate_page()?);
        }
        for (i, slice) in chunks.iter().enumerate() {
            self.stage(
                pages[i],
                Node::Overflow(OverflowNode {
                    next: pages.get(i + 1).copied(),
                    slice: Bytes::copy_from_slice(slice),
                }),
            );
        }
        Ok(ValuePayload::Overflow {
            head: pages[0],
            len: value.len() as u32,
        })
    }

    /// Materializes a record's value, reassembling overflow chains.
    pub(crate) fn read_value(&self, payload: &ValuePayload) -> Result<Vec<u8>> {
        match payload {
            ValuePayload::Inline(bytes) => Ok(bytes.to_vec()),
            ValuePayload::Overflow { head, len } => {
                let mut out = Vec::with_capacity(*len as usize);
                let mut current = Some(*head);
                let mut visited = 0u64;
                let limit = self.files.num_pages() + 1;
                while let Some(page) = current {
                    visited += 1;
                    if visited > limit {
                        return Err(chain_corrupt(page, "overflow chain cycle"));
                    }
                    let node = self.fetch(page)?;
                    match &*node {
                        Node::Overflow(overflow) => {
                            out.extend_from_slice(&overflow.slice);
                            current = overflow.next;
                        }
                        other => {
                            return Err(chain_corrupt(
                                page,
                                &format!("{:?} node linked into overflow chain", other.kind()),
                            ))
                        }
                    }
                }
                if out.len() != *len as usize {
                    return Err(chain_corrupt(
                        *head,
                        &format!(
                            "overflow chain holds {} bytes, leaf expects {}",
                            out.len(),
                            len
                        ),
                    ));
                }
                Ok(out)
            }
        }
    }

    /// Returns every page of an overflow chain to the freelist.
    pub(crate) fn free_chain(&mut self, head: PageId) -> Result<()> {
        let mut current = Some(head);
        let mut visited = 0u64;
        let limit = self.files.num_pages() + 1;
        while let Some(page) = current {
            visited += 1;
            if visited > limit {
                return Err(chain_corrupt(page, "overflow chain cycle"));
            }
            let node = self.fetch(page)?;
            match &*node {
                Node::Overflow(overflow) => {
                    current = overflow.next;
                }
                other => {
                    return Err(chain_corrupt(
                        page,
                        &format!("{:?} node linked into overflow chain", other.kind()),
                    ))
                }
            }
            self.free_page(page)?;
        }
        Ok(())
    }
}

fn chain_corrupt(page: PageId, reason: &str) -> LoamError {
    LoamError::CorruptPage {
        page: page.0,
        reason: reason.to_string(),
    }
}
