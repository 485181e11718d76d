//! WAL lifecycle: appending frames, committing, recovery and checkpoint.

use crate::frame::{
    decode_commit_tail, decode_header, encode_commit, encode_header, encode_page_frame,
    COMMIT_RECORD_SIZE, FRAME_ID_SIZE, WAL_HEADER_SIZE,
};
use loam_common::{LoamError, PageId, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append-only log of page images with commit framing.
///
/// Two in-memory indexes shadow the file: `committed` maps a page id to the
/// offset of its most recent committed image, `in_flight` to its image
/// within the currently open transaction. Reads consult `in_flight` first
/// so a writer observes its own staged pages.
pub struct Wal {
    file: File,
    path: PathBuf,
    page_size: u32,
    fsync: bool,
    /// Current append position; always equals the file length.
    len: u64,
    /// File length when the open transaction began.
    txn_start: u64,
    committed: HashMap<PageId, u64>,
    in_flight: HashMap<PageId, u64>,
    /// Running CRC over the open transaction's frame bytes.
    hasher: crc32fast::Hasher,
    /// Frames appended since the open transaction began.
    frames: u32,
}

impl Wal {
    /// Opens or creates the WAL file at `path`.
    ///
    /// A non-empty file means the tree was not closed cleanly: every
    /// well-formed committed transaction is indexed for replay and a torn
    /// tail is truncated away.
    pub fn open(path: &Path, page_size: u32, fsync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        let mut wal = Self {
            file,
            path: path.to_path_buf(),
            page_size,
            fsync,
            len,
            txn_start: WAL_HEADER_SIZE as u64,
            committed: HashMap::new(),
            in_flight: HashMap::new(),
            hasher: crc32fast::Hasher::new(),
            frames: 0,
        };

        if len == 0 {
            wal.file
                .write_all_at(&encode_header(page_size), 0)?;
            if fsync {
                wal.file.sync_all()?;
            }
            wal.len = WAL_HEADER_SIZE as u64;
            wal.txn_start = wal.len;
        } else {
            let mut header = [0u8; WAL_HEADER_SIZE];
            wal.file.read_exact_at(&mut header, 0)?;
            let wal_page_size = decode_header(&header)?;
            if wal_page_size != page_size {
                if len == WAL_HEADER_SIZE as u64 {
                    // Leftover header-only WAL from a failed open with a
                    // different geometry; adopt the caller's.
                    wal.file.write_all_at(&encode_header(page_size), 0)?;
                    if fsync {
                        wal.file.sync_all()?;
                    }
                } else {
                    return Err(LoamError::CorruptWal(format!(
                        "WAL page size {} does not match tree page size {}",
                        wal_page_size, page_size
                    )));
                }
            } else if len > WAL_HEADER_SIZE as u64 {
                // A clean close leaves only the header behind; anything more
                // means the last session never finished its checkpoint.
                warn!(path = %wal.path.display(), "found an existing WAL, tree was not closed cleanly");
                wal.recover()?;
            }
        }

        Ok(wal)
    }

    /// Path of the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct pages in the committed index.
    pub fn committed_pages(&self) -> usize {
        self.committed.len()
    }

    /// Current length of the WAL file in bytes.
    pub fn file_len(&self) -> u64 {
        self.len
    }

    /// Highest page id present in the committed index, if any.
    ///
    /// Pages allocated past the end of the main file live only in the WAL
    /// until the next checkpoint; the file manager uses this to restore its
    /// logical page count on open.
    pub fn max_committed_page(&self) -> Option<PageId> {
        self.committed.keys().max().copied()
    }

    /// Begins a transaction, snapshotting the truncation point for abort.
    ///
    /// Frames left behind by a transaction that neither committed nor
    /// rolled back are truncated away first; committed data always ends at
    /// the previous commit record.
    pub fn begin(&mut self) -> Result<()> {
        if self.len != self.txn_start || !self.in_flight.is_empty() {
            warn!("discarding frames from an abandoned transaction");
            self.rollback()?;
        }
        self.txn_start = self.len;
        self.hasher = crc32fast::Hasher::new();
        self.frames = 0;
        Ok(())
    }

    /// Appends one page frame to the open transaction.
    ///
    /// The frame is not fsynced; durability comes from the commit record.
    pub fn write_page(&mut self, page: PageId, image: &[u8]) -> Result<()> {
        debug_assert_eq!(image.len(), self.page_size as usize);
        let frame = encode_page_frame(page, image);
        self.file.write_all_at(&frame, self.len)?;
        self.hasher.update(&frame);
        self.in_flight
            .insert(page, self.len + FRAME_ID_SIZE as u64);
        self.len += frame.len() as u64;
        self.frames += 1;
        Ok(())
    }

    /// Commits the open transaction: writes the commit record, fsyncs, and
    /// promotes the staged frames into the committed index.
    ///
    /// A transaction with no frames is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.frames == 0 {
            return Ok(());
        }
        let crc = self.hasher.clone().finalize();
        let record = encode_commit(self.frames, crc);
        self.file.write_all_at(&record, self.len)?;
        self.len += record.len() as u64;
        if self.fsync {
            self.file.sync_all()?;
        }
        self.committed.extend(self.in_flight.drain());
        self.hasher = crc32fast::Hasher::new();
        self.frames = 0;
        self.txn_start = self.len;
        Ok(())
    }

    /// Aborts the open transaction by truncating back to where it began.
    pub fn rollback(&mut self) -> Result<()> {
        if self.len != self.txn_start {
            self.file.set_len(self.txn_start)?;
            self.len = self.txn_start;
        }
        self.in_flight.clear();
        self.hasher = crc32fast::Hasher::new();
        self.frames = 0;
        Ok(())
    }

    /// Returns the latest image of `page` held by the WAL, if any.
    ///
    /// The open transaction's frames shadow committed ones.
    pub fn read_page(&self, page: PageId) -> Result<Option<Vec<u8>>> {
        let offset = self
            .in_flight
            .get(&page)
            .or_else(|| self.committed.get(&page));
        match offset {
            Some(&offset) => {
                let mut buf = vec![0u8; self.page_size as usize];
                self.file.read_exact_at(&mut buf, offset)?;
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    /// Hands every committed page's latest image to `write`.
    ///
    /// Uncommitted frames left in the open transaction are discarded first;
    /// checkpoints only ever run between transactions.
    pub fn drain_committed<F>(&mut self, mut write: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        if !self.in_flight.is_empty() {
            warn!("checkpoint with uncommitted WAL data, discarding it");
            self.rollback()?;
        }
        let mut buf = vec![0u8; self.page_size as usize];
        for (&page, &offset) in &self.committed {
            self.file.read_exact_at(&mut buf, offset)?;
            write(page, &buf)?;
        }
        Ok(self.committed.len())
    }

    /// Truncates the WAL back to its bare header and clears the indexes.
    ///
    /// Call only after the drained pages are durable in the main file.
    pub fn reset(&mut self) -> Result<()> {
        let drained = self.committed.len();
        self.committed.clear();
        self.in_flight.clear();
        self.hasher = crc32fast::Hasher::new();
        self.frames = 0;
        self.file.set_len(WAL_HEADER_SIZE as u64)?;
        self.len = WAL_HEADER_SIZE as u64;
        self.txn_start = self.len;
        if self.fsync {
            self.file.sync_all()?;
        }
        debug!(pages = drained, "WAL reset after checkpoint");
        Ok(())
    }

    /// Forces the WAL file to disk regardless of the fsync policy.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Scans the file, indexing committed transactions and truncating any
    /// torn tail. Corruption that is *followed* by a verifiable committed
    /// transaction cannot be a torn tail and is reported as `CorruptWal`.
    fn recover(&mut self) -> Result<()> {
        let body_len = (self.len as usize).saturating_sub(WAL_HEADER_SIZE);
        let mut buf = vec![0u8; body_len];
        self.file.read_exact_at(&mut buf, WAL_HEADER_SIZE as u64)?;

        let frame_len = FRAME_ID_SIZE + self.page_size as usize;
        let mut pos = 0usize;
        let mut last_good = 0usize;
        let mut pending: HashMap<PageId, u64> = HashMap::new();
        let mut pending_frames: u32 = 0;
        let mut hasher = crc32fast::Hasher::new();
        let mut saw_corruption = false;

        while pos < buf.len() {
            let remaining = buf.len() - pos;
            if remaining < FRAME_ID_SIZE {
                break; // torn frame header
            }
            let id = u64::from_le_bytes(buf[pos..pos + FRAME_ID_SIZE].try_into().unwrap());
            if id == PageId::COMMIT_SENTINEL.0 {
                if remaining < COMMIT_RECORD_SIZE {
                    break; // torn commit record
                }
                let (count, crc) =
                    decode_commit_tail(&buf[pos + FRAME_ID_SIZE..pos + COMMIT_RECORD_SIZE]);
                let computed = hasher.clone().finalize();
                pos += COMMIT_RECORD_SIZE;
                if count == pending_frames && crc == computed {
                    if saw_corruption {
                        return Err(LoamError::CorruptWal(
                            "committed transaction found after corrupt data".to_string(),
                        ));
                    }
                    self.committed.extend(pending.drain());
                    last_good = pos;
                } else {
                    saw_corruption = true;
                    pending.clear();
                }
                pending_frames = 0;
                hasher = crc32fast::Hasher::new();
            } else {
                if remaining < frame_len {
                    break; // torn page frame
                }
                let frame = &buf[pos..pos + frame_len];
                hasher.update(frame);
                pending.insert(
                    PageId(id),
                    (WAL_HEADER_SIZE + pos + FRAME_ID_SIZE) as u64,
                );
                pending_frames += 1;
                pos += frame_len;
            }
        }

        if pending_frames > 0 {
            warn!(
                frames = pending_frames,
                "WAL has uncommitted data, discarding it"
            );
        }

        let good_len = (WAL_HEADER_SIZE + last_good) as u64;
        if good_len < self.len {
            warn!(
                discarded = self.len - good_len,
                "truncating torn WAL tail"
            );
            self.file.set_len(good_len)?;
            self.len = good_len;
        }
        self.txn_start = self.len;
        debug!(
            pages = self.committed.len(),
            "WAL recovery indexed committed pages"
        );
        Ok(())
    }
}
