//! Page identifiers and node kinds for LoamDB storage.

use serde::{Deserialize, Serialize};

/// Unique identifier for a page within the tree file.
///
/// A page id is the page's byte offset in the file divided by the
/// configured page size. Page id 0 is reserved for the metadata page and
/// doubles as the null sentinel wherever a page reference is optional
/// (leaf sibling, overflow next, freelist next).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PageId(pub u64);

impl PageId {
    /// The metadata page, always at the start of the file.
    pub const META: PageId = PageId(0);

    /// Sentinel used in WAL commit records; never a valid page.
    pub const COMMIT_SENTINEL: PageId = PageId(u64::MAX);

    /// Byte offset of this page in a file with the given page size.
    pub fn offset(&self, page_size: u32) -> u64 {
        self.0 * page_size as u64
    }

    /// Encodes an optional page reference: `None` becomes 0.
    pub fn encode_opt(page: Option<PageId>) -> u64 {
        page.map(|p| p.0).unwrap_or(0)
    }

    /// Decodes an optional page reference: 0 becomes `None`.
    pub fn decode_opt(raw: u64) -> Option<PageId> {
        if raw == 0 {
            None
        } else {
            Some(PageId(raw))
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node kinds stored in the first byte of every non-metadata page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeKind {
    /// Leaf node holding records.
    Leaf = 1,
    /// Internal node holding separator keys and child pointers.
    Internal = 2,
    /// One link of an overflow chain for a large value.
    Overflow = 3,
    /// One link of the free-page chain.
    Freelist = 4,
}

impl NodeKind {
    /// Decodes a kind byte. Returns `None` for unknown bytes so the caller
    /// can attach the page id to the resulting corruption error.
    pub fn from_byte(byte: u8) -> Option<NodeKind> {
        match byte {
            1 => Some(NodeKind::Leaf),
            2 => Some(NodeKind::Internal),
            3 => Some(NodeKind::Overflow),
            4 => Some(NodeKind::Freelist),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_offset() {
        assert_eq!(PageId(0).offset(4096), 0);
        assert_eq!(PageId(3).offset(4096), 12288);
        assert_eq!(PageId(7).offset(512), 3584);
    }

    #[test]
    fn test_page_id_opt_roundtrip() {
        assert_eq!(PageId::encode_opt(None), 0);
        assert_eq!(PageId::encode_opt(Some(PageId(9))), 9);
        assert_eq!(PageId::decode_opt(0), None);
        assert_eq!(PageId::decode_opt(9), Some(PageId(9)));
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(123).to_string(), "123");
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId(1));
        set.insert(PageId(2));
        set.insert(PageId(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_node_kind_repr() {
        assert_eq!(NodeKind::Leaf as u8, 1);
        assert_eq!(NodeKind::Internal as u8, 2);
        assert_eq!(NodeKind::Overflow as u8, 3);
        assert_eq!(NodeKind::Freelist as u8, 4);
    }

    #[test]
    fn test_node_kind_from_byte() {
        assert_eq!(NodeKind::from_byte(1), Some(NodeKind::Leaf));
        assert_eq!(NodeKind::from_byte(4), Some(NodeKind::Freelist));
        assert_eq!(NodeKind::from_byte(0), None);
        assert_eq!(NodeKind::from_byte(5), None);
        assert_eq!(NodeKind::from_byte(255), None);
    }
}
