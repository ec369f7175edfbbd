//! Heap store: validated key-value access over the append-only log.

use cinder_common::{CinderError, LogConfig, Result};
use std::path::Path;

use crate::log::Log;
use crate::record::{self, HeapLayout, HeapRecord};
use crate::scan::scan_newest;

/// An append-only heap of key-value records.
///
/// Records are only ever appended; a later `put` with the same key
/// supersedes every earlier copy. Lookup is a buffered sequential scan
/// in which the most recent record wins. Compaction of the underlying
/// record stream is an offline job (see `Compactor`).
pub struct Heap {
    log: Log,
    scan_window: usize,
}

impl Heap {
    /// Opens a heap stored in `dir` with the default configuration.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, LogConfig::default())
    }

    /// Opens a heap stored in `dir`.
    pub fn open_with(dir: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        let scan_window = config.scan_window;
        let log = Log::open_with(dir, config)?;
        Ok(Self { log, scan_window })
    }

    /// Appends a record for `key`, superseding any earlier one.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let record = HeapRecord::new(key, value)?;
        self.log.append(&record.marshal())?;
        Ok(())
    }

    /// Returns the newest value stored for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        record::validate_key(key)?;

        match scan_newest::<HeapLayout>(&self.log, key, self.scan_window)? {
            Some(value) => Ok(value),
            None => Err(CinderError::NotFound),
        }
    }

    /// Flushes the underlying log to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    /// Closes the heap and its log. Safe to call exactly once.
    pub fn close(&self) -> Result<()> {
        self.log.close()
    }

    /// The underlying log, for offline jobs that consume raw records.
    pub fn log(&self) -> &Log {
        &self.log
    }
}
