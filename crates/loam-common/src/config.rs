//! Configuration structures for LoamDB.

use crate::error::{LoamError, Result};
use serde::{Deserialize, Serialize};

/// Size of the fixed header at the start of every non-metadata page.
///
/// Layout:
/// - kind: 1 byte
/// - reserved: 1 byte
/// - entry count: 2 bytes
/// - next pointer: 8 bytes (leaf sibling / overflow next / freelist next)
/// - extra: 4 bytes (overflow payload slice length)
pub const NODE_HEADER_SIZE: usize = 16;

/// Persisted tree geometry.
///
/// These four values are written to the metadata page when the tree file is
/// created and are immutable for the lifetime of the file. Reopening with a
/// different geometry fails with [`LoamError::ConfigMismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Page size in bytes.
    pub page_size: u32,
    /// Branching factor: maximum number of children of an internal node.
    pub order: u32,
    /// Exact width of serialized keys in bytes.
    pub key_size: u32,
    /// Maximum value length stored inline in a leaf; longer values spill
    /// into an overflow chain.
    pub value_size: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            order: 100,
            key_size: 8,
            value_size: 16,
        }
    }
}

impl TreeConfig {
    /// Width of the payload area of a leaf entry.
    ///
    /// Must hold either an inline value (`value_size` bytes) or an 8-byte
    /// overflow head page id, whichever is larger.
    pub fn payload_width(&self) -> usize {
        (self.value_size as usize).max(8)
    }

    /// On-disk width of one leaf entry:
    /// key + flag byte + 4-byte value length + payload area.
    pub fn leaf_entry_size(&self) -> usize {
        self.key_size as usize + 1 + 4 + self.payload_width()
    }

    /// On-disk width of one internal entry: separator key + child pointer.
    pub fn internal_entry_size(&self) -> usize {
        self.key_size as usize + 8
    }

    /// Maximum number of records in a leaf node.
    pub fn leaf_capacity(&self) -> usize {
        self.order as usize - 1
    }

    /// Maximum number of separator keys in an internal node.
    pub fn internal_capacity(&self) -> usize {
        self.order as usize - 1
    }

    /// Payload bytes carried by a single overflow page.
    pub fn overflow_capacity(&self) -> usize {
        self.page_size as usize - NODE_HEADER_SIZE
    }

    /// Checks that nodes of this geometry fit in a page.
    pub fn validate(&self) -> Result<()> {
        if self.order < 3 {
            return Err(LoamError::InvalidConfig(format!(
                "order must be at least 3, got {}",
                self.order
            )));
        }
        if self.key_size == 0 {
            return Err(LoamError::InvalidConfig(
                "key_size must be at least 1".to_string(),
            ));
        }

        let leaf_bytes = NODE_HEADER_SIZE + self.leaf_capacity() * self.leaf_entry_size();
        if leaf_bytes > self.page_size as usize {
            return Err(LoamError::InvalidConfig(format!(
                "a full leaf needs {} bytes but page_size is {}",
                leaf_bytes, self.page_size
            )));
        }

        let internal_bytes =
            NODE_HEADER_SIZE + 8 + self.internal_capacity() * self.internal_entry_size();
        if internal_bytes > self.page_size as usize {
            return Err(LoamError::InvalidConfig(format!(
                "a full internal node needs {} bytes but page_size is {}",
                internal_bytes, self.page_size
            )));
        }

        Ok(())
    }
}

/// Runtime options for opening a tree.
///
/// Only [`TreeOptions::config`] is persisted; the rest applies to the
/// current process and may differ between opens.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    /// Persisted geometry. Must match the file on reopen.
    pub config: TreeConfig,
    /// Maximum number of clean decoded nodes kept in memory.
    pub cache_size: usize,
    /// Fsync the WAL on commit and the main file on checkpoint.
    pub fsync: bool,
    /// Checkpoint automatically once this many committed pages accumulate
    /// in the WAL. 0 disables automatic checkpoints.
    pub checkpoint_after: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            config: TreeConfig::default(),
            cache_size: 512,
            fsync: true,
            checkpoint_after: 1024,
        }
    }
}
