//! Metadata page codec.
//!
//! Page 0 of the tree file identifies the format and pins the tree
//! geometry for the lifetime of the file.
//!
//! Layout:
//! - magic: 8 bytes (`b"LOAMTREE"`)
//! - format version: 4 bytes
//! - page_size: 4 bytes
//! - order: 4 bytes
//! - key_size: 4 bytes
//! - value_size: 4 bytes
//! - root page id: 8 bytes
//! - freelist head page id: 8 bytes (0 = empty)
//! - zero padding to page_size

use bytes::{Buf, BufMut, BytesMut};
use loam_common::{LoamError, PageId, Result, TreeConfig};

/// Magic bytes identifying a LoamDB tree file.
pub const MAGIC: &[u8; 8] = b"LOAMTREE";

/// On-disk format version written at create time.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed-size portion of the metadata page.
pub const META_CONTENT_SIZE: usize = 8 + 4 + 4 * 4 + 8 + 8;

/// Decoded metadata page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Persisted tree geometry.
    pub config: TreeConfig,
    /// Page id of the current root node.
    pub root: PageId,
    /// Head of the free-page chain, if any pages are free.
    pub freelist_head: Option<PageId>,
}

impl Metadata {
    /// Encodes the metadata into a full page image.
    pub fn encode(&self) -> Vec<u8> {
        let page_size = self.config.page_size as usize;
        let mut buf = BytesMut::with_capacity(page_size);
        buf.put_slice(MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(self.config.page_size);
        buf.put_u32_le(self.config.order);
        buf.put_u32_le(self.config.key_size);
        buf.put_u32_le(self.config.value_size);
        buf.put_u64_le(self.root.0);
        buf.put_u64_le(PageId::encode_opt(self.freelist_head));
        buf.resize(page_size, 0);
        buf.to_vec()
    }

    /// Decodes the metadata page, validating magic and version.
    pub fn decode(mut data: &[u8]) -> Result<Metadata> {
        if data.len() < META_CONTENT_SIZE {
            return Err(corrupt("metadata page too short"));
        }
        if &data[..8] != MAGIC {
            return Err(corrupt("bad magic, not a LoamDB tree file"));
        }
        data.advance(8);

        let version = data.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!(
                "unsupported format version {}",
                version
            )));
        }

        let config = TreeConfig {
            page_size: data.get_u32_le(),
            order: data.get_u32_le(),
            key_size: data.get_u32_le(),
            value_size: data.get_u32_le(),
        };
        let root = PageId(data.get_u64_le());
        let freelist_head = PageId::decode_opt(data.get_u64_le());

        Ok(Metadata {
            config,
            root,
            freelist_head,
        })
    }

    /// Checks a caller-supplied geometry against the persisted one.
    pub fn verify_config(&self, requested: &TreeConfig) -> Result<()> {
        let fields = [
            ("page_size", self.config.page_size, requested.page_size),
            ("order", self.config.order, requested.order),
            ("key_size", self.config.key_size, requested.key_size),
            ("value_size", self.config.value_size, requested.value_size),
        ];
        for (field, on_disk, requested) in fields {
            if on_disk != requested {
                return Err(LoamError::ConfigMismatch {
                    field,
                    on_disk,
                    requested,
                });
            }
        }
        Ok(())
    }
}

fn corrupt(reason: &str) -> LoamError {
    LoamError::CorruptPage {
        page: PageId::META.0,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata {
            config: TreeConfig {
                page_size: 4096,
                order: 100,
                key_size: 8,
                value_size: 16,
            },
            root: PageId(1),
            freelist_head: Some(PageId(42)),
        }
    }

    #[test]
    fn test_roundtrip() {
        let meta = sample();
        let encoded = meta.encode();
        assert_eq!(encoded.len(), 4096);
        assert_eq!(Metadata::decode(&encoded).unwrap(), meta);
    }

    #[test]
    fn test_empty_freelist_roundtrip() {
        let meta = Metadata {
            freelist_head: None,
            ..sample()
        };
        let decoded = Metadata::decode(&meta.encode()).unwrap();
        assert_eq!(decoded.freelist_head, None);
    }

    #[test]
    fn test_padding_is_zero() {
        let encoded = sample().encode();
        assert!(encoded[META_CONTENT_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut encoded = sample().encode();
        encoded[0] = b'X';
        assert!(matches!(
            Metadata::decode(&encoded),
            Err(LoamError::CorruptPage { page: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_future_version() {
        let mut encoded = sample().encode();
        encoded[8..12].copy_from_slice(&99u32.to_le_bytes());
        let err = Metadata::decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_verify_config_match() {
        let meta = sample();
        meta.verify_config(&meta.config).unwrap();
    }

    #[test]
    fn test_verify_config_mismatch() {
        let meta = sample();
        let requested = TreeConfig {
            order: 4,
            ..meta.config
        };
        assert!(matches!(
            meta.verify_config(&requested),
            Err(LoamError::ConfigMismatch { field: "order", .. })
        ));
    }
}
