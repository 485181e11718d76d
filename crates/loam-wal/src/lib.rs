//! Write-ahead log for LoamDB.
//!
//! The WAL is an append-only file of full page images grouped into
//! transactions. A transaction is a run of page frames terminated by a
//! commit record carrying a CRC32 over the frames. Pages reach the main
//! tree file only when the WAL is checkpointed.

pub mod frame;
pub mod wal;

pub use frame::{COMMIT_RECORD_SIZE, FRAME_ID_SIZE, WAL_HEADER_SIZE};
pub use wal::Wal;
