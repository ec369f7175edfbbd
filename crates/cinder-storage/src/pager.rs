//! Page-level storage media for the B+ tree.

use cinder_common::page::{PageId, PAGE_SIZE};
use cinder_common::{CinderError, Result, TreeConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A medium that maps page identifiers to fixed-size byte blocks.
///
/// The contract: `load` observes the most recent successful `store` for
/// the same identifier and never returns a partial page; data is durable
/// only after `sync`; every operation after `close` fails.
pub trait Pager: Send + Sync {
    /// Reads exactly one page at the identifier's offset.
    fn load(&self, id: PageId) -> Result<[u8; PAGE_SIZE]>;

    /// Writes exactly one page at the identifier's offset.
    fn store(&self, id: PageId, page: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Flushes prior stores to stable storage.
    fn sync(&self) -> Result<()>;

    /// Releases the underlying handle. Safe to call exactly once.
    fn close(&self) -> Result<()>;

    /// Returns the number of page slots currently backed by the medium.
    fn page_count(&self) -> Result<u64>;
}

/// Pager backed by a single random-access file.
pub struct FilePager {
    config: TreeConfig,
    #[allow(dead_code)]
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FilePager {
    /// Opens or creates the tree file at `path`.
    pub fn open(path: impl AsRef<Path>, config: TreeConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            config,
            path,
            file: Mutex::new(Some(file)),
        })
    }
}

impl Pager for FilePager {
    fn load(&self, id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut file = self.file.lock();
        let file = file.as_mut().ok_or(CinderError::Closed)?;

        file.seek(SeekFrom::Start(id.offset()))?;

        let mut buffer = [0u8; PAGE_SIZE];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn store(&self, id: PageId, page: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        let file = file.as_mut().ok_or(CinderError::Closed)?;

        file.seek(SeekFrom::Start(id.offset()))?;
        file.write_all(page)?;

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        let file = file.as_ref().ok_or(CinderError::Closed)?;

        if self.config.fsync_enabled {
            file.sync_all()?;
        }

        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut file = self.file.lock();
        let file = file.take().ok_or(CinderError::Closed)?;
        file.sync_all()?;
        Ok(())
    }

    fn page_count(&self) -> Result<u64> {
        let file = self.file.lock();
        let file = file.as_ref().ok_or(CinderError::Closed)?;

        Ok(file.metadata()?.len() / PAGE_SIZE as u64)
    }
}

impl Drop for FilePager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// In-memory pager used by tests; a mapping from page identifier to
/// page buffer that honors the same contract as `FilePager`.
pub struct MemPager {
    pages: Mutex<Option<HashMap<PageId, Box<[u8; PAGE_SIZE]>>>>,
}

impl MemPager {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(Some(HashMap::new())),
        }
    }
}

impl Default for MemPager {
    fn default() -> Self {
        Self::new()
    }
}

impl Pager for MemPager {
    fn load(&self, id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let pages = self.pages.lock();
        let pages = pages.as_ref().ok_or(CinderError::Closed)?;

        match pages.get(&id) {
            Some(page) => Ok(**page),
            None => Err(CinderError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("page {} does not exist", id),
            ))),
        }
    }

    fn store(&self, id: PageId, page: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut pages = self.pages.lock();
        let pages = pages.as_mut().ok_or(CinderError::Closed)?;

        pages.insert(id, Box::new(*page));
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let pages = self.pages.lock();
        pages.as_ref().ok_or(CinderError::Closed)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut pages = self.pages.lock();
        pages.take().ok_or(CinderError::Closed)?;
        Ok(())
    }

    fn page_count(&self) -> Result<u64> {
        let pages = self.pages.lock();
        let pages = pages.as_ref().ok_or(CinderError::Closed)?;

        Ok(pages.keys().map(|id| id.0 + 1).max().unwrap_or(0))
    }
}
