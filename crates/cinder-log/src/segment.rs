//! Heap log segment files.

use cinder_common::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single append-only segment file.
///
/// A segment knows the logical offset at which it starts; logical
/// offsets increase monotonically across the whole segment list, as if
/// the segments were one file.
pub(crate) struct Segment {
    start_offset: u64,
    file: File,
    len: u64,
}

impl Segment {
    /// Creates a segment with a deterministic, timestamp-derived name,
    /// opened with create-or-append semantics.
    pub fn create(dir: &Path, start_offset: u64) -> Result<Self> {
        let path = dir.join(filename(SystemTime::now()));
        Self::open(path, start_offset)
    }

    /// Opens an existing or new segment file at `path`.
    pub fn open(path: PathBuf, start_offset: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            start_offset,
            file,
            len,
        })
    }

    /// Logical offset at which this segment starts.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Bytes stored in this segment.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Appends bytes to the end of the segment. The length counter only
    /// advances on a fully successful write.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Reads into `buf` starting at a segment-local offset. The result
    /// may be short when the segment ends before the buffer is full.
    pub fn read_at(&mut self, buf: &mut [u8], local_off: u64) -> Result<usize> {
        self.file.seek(SeekFrom::Start(local_off))?;

        let mut total = 0;
        while total < buf.len() {
            let n = self.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Flushes the segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Segment filename derived from the creation timestamp.
pub(crate) fn filename(now: SystemTime) -> String {
    let nanos = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:020}.log", nanos)
}
