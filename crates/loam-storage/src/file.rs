//! File manager owning the main tree file and its WAL.
//!
//! All writes route through the WAL; the main file is only touched at
//! checkpoint, when committed page images land at `page_id * page_size`.
//! Reads consult the WAL first so the latest committed (or staged) image
//! always wins over the main file.

use loam_common::{LoamError, PageId, Result};
use loam_wal::Wal;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Derives the WAL path for a tree file: `<main>-wal`.
pub fn wal_path(main: &Path) -> PathBuf {
    let mut name = OsString::from(main.as_os_str());
    name.push("-wal");
    PathBuf::from(name)
}

/// Owns the two file handles and the logical size of the tree.
///
/// `num_pages` is a high-water mark over both files: pages allocated and
/// committed in the WAL count even before they reach the main file.
pub struct FileManager {
    file: File,
    path: PathBuf,
    wal: Wal,
    page_size: u32,
    fsync: bool,
    num_pages: u64,
    /// `num_pages` when the open transaction began, for rollback.
    pages_snapshot: u64,
}

impl FileManager {
    /// Opens or creates the main file and its WAL.
    ///
    /// Opening performs WAL recovery; call [`FileManager::checkpoint`]
    /// afterwards to drain whatever recovery found.
    pub fn open(path: &Path, page_size: u32, fsync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let file_len = file.metadata()?.len();
        if file_len % page_size as u64 != 0 {
            return Err(LoamError::CorruptPage {
                page: file_len / page_size as u64,
                reason: format!(
                    "file length {} is not a multiple of page size {}",
                    file_len, page_size
                ),
            });
        }

        let wal = Wal::open(&wal_path(path), page_size, fsync)?;
        let mut num_pages = file_len / page_size as u64;
        if let Some(max) = wal.max_committed_page() {
            num_pages = num_pages.max(max.0 + 1);
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            wal,
            page_size,
            fsync,
            num_pages,
            pages_snapshot: num_pages,
        })
    }

    /// Path of the main tree file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical number of pages, including pages that only exist in the WAL.
    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    /// Number of committed pages waiting in the WAL.
    pub fn wal_pages(&self) -> usize {
        self.wal.committed_pages()
    }

    /// Reads the latest visible image of a page: the WAL's staged frame,
    /// then its committed frame, then the main file.
    pub fn read_page(&self, page: PageId) -> Result<Vec<u8>> {
        if let Some(image) = self.wal.read_page(page)? {
            return Ok(image);
        }
        let mut buf = vec![0u8; self.page_size as usize];
        self.file
            .read_exact_at(&mut buf, page.offset(self.page_size))
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    LoamError::CorruptPage {
                        page: page.0,
                        reason: "page beyond end of file".to_string(),
                    }
                } else {
                    LoamError::Io(err)
                }
            })?;
        Ok(buf)
    }

    /// Stages a page image in the open WAL transaction.
    pub fn write_page(&mut self, page: PageId, image: &[u8]) -> Result<()> {
        self.wal.write_page(page, image)
    }

    /// Grows the tree by one page and returns its id.
    ///
    /// Purely logical: the main file is extended lazily when the page's
    /// image is checkpointed.
    pub fn extend(&mut self) -> PageId {
        let page = PageId(self.num_pages);
        self.num_pages += 1;
        page
    }

    /// Begins a WAL transaction.
    pub fn begin(&mut self) -> Result<()> {
        self.pages_snapshot = self.num_pages;
        self.wal.begin()
    }

    /// Commits the open WAL transaction.
    pub fn commit(&mut self) -> Result<()> {
        self.wal.commit()
    }

    /// Aborts the open WAL transaction, undoing any logical extension.
    pub fn rollback(&mut self) -> Result<()> {
        self.num_pages = self.pages_snapshot;
        self.wal.rollback()
    }

    /// Drains every committed WAL page into the main file, syncs it, and
    /// resets the WAL. Returns the number of pages written.
    pub fn checkpoint(&mut self) -> Result<usize> {
        let file = &self.file;
        let page_size = self.page_size;
        let written = self.wal.drain_committed(|page, image| {
            file.write_all_at(image, page.offset(page_size))?;
            Ok(())
        })?;
        if self.fsync {
            self.file.sync_all()?;
        }
        self.wal.reset()?;
        debug!(pages = written, "checkpointed WAL into main file");
        Ok(written)
    }

    /// Forces both files to disk regardless of the fsync policy.
    pub fn sync_all(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.wal.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE_SIZE: u32 = 128;

    fn image(fill: u8) -> Vec<u8> {
        vec![fill; PAGE_SIZE as usize]
    }

    fn open_in(dir: &Path) -> FileManager {
        FileManager::open(&dir.join("tree.db"), PAGE_SIZE, false).unwrap()
    }

    #[test]
    fn test_wal_path_derivation() {
        assert_eq!(
            wal_path(Path::new("/data/tree.db")),
            PathBuf::from("/data/tree.db-wal")
        );
    }

    #[test]
    fn test_extend_is_sequential() {
        let dir = tempdir().unwrap();
        let mut files = open_in(dir.path());
        assert_eq!(files.extend(), PageId(0));
        assert_eq!(files.extend(), PageId(1));
        assert_eq!(files.num_pages(), 2);
    }

    #[test]
    fn test_write_routes_to_wal_until_checkpoint() {
        let dir = tempdir().unwrap();
        let mut files = open_in(dir.path());

        files.begin().unwrap();
        let page = files.extend();
        files.write_page(page, &image(0xAB)).unwrap();
        files.commit().unwrap();

        // Visible through the WAL, while the main file is still empty.
        assert_eq!(files.read_page(page).unwrap(), image(0xAB));
        assert_eq!(
            std::fs::metadata(dir.path().join("tree.db")).unwrap().len(),
            0
        );

        files.checkpoint().unwrap();
        assert_eq!(
            std::fs::metadata(dir.path().join("tree.db")).unwrap().len(),
            PAGE_SIZE as u64
        );
        assert_eq!(files.read_page(page).unwrap(), image(0xAB));
    }

    #[test]
    fn test_rollback_undoes_extension() {
        let dir = tempdir().unwrap();
        let mut files = open_in(dir.path());

        files.begin().unwrap();
        let page = files.extend();
        files.write_page(page, &image(0x01)).unwrap();
        files.rollback().unwrap();

        assert_eq!(files.num_pages(), 0);
        assert!(files.read_page(page).is_err());
    }

    #[test]
    fn test_num_pages_counts_wal_only_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.db");
        {
            let mut files = FileManager::open(&path, PAGE_SIZE, false).unwrap();
            files.begin().unwrap();
            let p0 = files.extend();
            let p1 = files.extend();
            files.write_page(p0, &image(0x00)).unwrap();
            files.write_page(p1, &image(0x11)).unwrap();
            files.commit().unwrap();
            // No checkpoint: pages exist only in the WAL.
        }

        let files = FileManager::open(&path, PAGE_SIZE, false).unwrap();
        assert_eq!(files.num_pages(), 2);
        assert_eq!(files.read_page(PageId(1)).unwrap(), image(0x11));
    }

    #[test]
    fn test_read_missing_page_is_corrupt() {
        let dir = tempdir().unwrap();
        let files = open_in(dir.path());
        assert!(matches!(
            files.read_page(PageId(7)),
            Err(LoamError::CorruptPage { page: 7, .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_main_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.db");
        std::fs::write(&path, vec![0u8; PAGE_SIZE as usize + 10]).unwrap();
        assert!(matches!(
            FileManager::open(&path, PAGE_SIZE, false),
            Err(LoamError::CorruptPage { .. })
        ));
    }
}
