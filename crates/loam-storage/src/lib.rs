//! LoamDB storage engine: an embeddable, on-disk B+tree.
//!
//! A tree lives in two files: the main page file and a `<main>-wal`
//! write-ahead log. Mutations stage full page images in the WAL and only
//! reach the main file at checkpoint, so a crash at any point rolls back
//! to the last committed transaction on reopen.
//!
//! ```no_run
//! use loam_storage::{BPlusTree, IntSerializer, KeySerializer, TreeOptions};
//!
//! let tree = BPlusTree::open("example.db", TreeOptions::default())?;
//! let serializer = IntSerializer;
//! let key = serializer.serialize(&42u64, 8)?;
//! tree.insert(&key, b"the answer")?;
//! assert_eq!(tree.get(&key)?.as_deref(), Some(&b"the answer"[..]));
//! tree.close()?;
//! # Ok::<(), loam_storage::LoamError>(())
//! ```

pub mod file;
pub mod meta;
pub mod node;
pub mod serializer;
pub mod tree;
pub mod verify;

mod freelist;
mod overflow;

pub use loam_common::{LoamError, NodeKind, PageId, Result, TreeConfig, TreeOptions};
pub use serializer::{IntSerializer, KeySerializer, StrSerializer};
pub use tree::{BPlusTree, RangeScan};
pub use verify::TreeStats;
