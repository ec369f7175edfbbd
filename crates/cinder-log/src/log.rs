//! Append-only segmented log with logical offsets.

use cinder_common::{CinderError, LogConfig, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::segment::Segment;

/// A log split across multiple segment files.
///
/// Writes only ever go to the newest segment; reads may address any
/// logical offset and are routed to the covering segment. The log is
/// safe for serialized writes with concurrent reads.
pub struct Log {
    dir: PathBuf,
    config: LogConfig,
    inner: Mutex<Option<LogInner>>,
}

struct LogInner {
    /// Oldest first; the last segment is the write target.
    segments: Vec<Segment>,
    /// Total logical size across all segments.
    size: u64,
}

impl Log {
    /// Opens a log in `dir` with the default configuration.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, LogConfig::default())
    }

    /// Opens a log in `dir`, picking up existing segment files in
    /// timestamp order. An empty directory gets its first segment at
    /// logical offset 0.
    pub fn open_with(dir: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut inner = LogInner {
            segments: Vec::new(),
            size: 0,
        };

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "log").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            let segment = Segment::open(path, inner.size)?;
            inner.size += segment.len();
            inner.segments.push(segment);
        }

        if inner.segments.is_empty() {
            inner.rotate(&dir)?;
        }

        tracing::debug!(
            dir = %dir.display(),
            segments = inner.segments.len(),
            size = inner.size,
            "opened log"
        );

        Ok(Self {
            dir,
            config,
            inner: Mutex::new(Some(inner)),
        })
    }

    /// Appends bytes to the head segment and returns the logical offset
    /// at which they begin. A failed write does not advance the size.
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(CinderError::Closed)?;

        let head_len = inner.segments.last().map(Segment::len).unwrap_or(0);
        if head_len >= self.config.segment_size && head_len > 0 {
            inner.rotate(&self.dir)?;
            tracing::debug!(size = inner.size, "rotated log segment");
        }

        let off = inner.size;
        let head = inner.segments.last_mut().ok_or_else(|| {
            CinderError::CorruptData("log has no segments".to_string())
        })?;
        head.append(data)?;
        inner.size += data.len() as u64;
        Ok(off)
    }

    /// Reads into `buf` starting at logical offset `off`, crossing
    /// segment boundaries as needed. Returns the bytes read; a read at
    /// or past the current size reads zero bytes (end of stream).
    pub fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(CinderError::Closed)?;

        let mut total = 0;
        let mut off = off;
        while total < buf.len() && off < inner.size {
            let idx = inner.seek_segment(off)?;
            let segment = &mut inner.segments[idx];
            let local = off - segment.start_offset();

            let n = segment.read_at(&mut buf[total..], local)?;
            if n == 0 {
                return Err(CinderError::CorruptData(format!(
                    "segment shorter than logical size at offset {}",
                    off
                )));
            }
            total += n;
            off += n as u64;
        }

        Ok(total)
    }

    /// Opens a new head segment starting at the current size.
    pub fn rotate(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = guard.as_mut().ok_or(CinderError::Closed)?;
        inner.rotate(&self.dir)
    }

    /// Total logical size of the log in bytes.
    pub fn size(&self) -> Result<u64> {
        let guard = self.inner.lock();
        let inner = guard.as_ref().ok_or(CinderError::Closed)?;
        Ok(inner.size)
    }

    /// Flushes all segments to stable storage.
    pub fn sync(&self) -> Result<()> {
        let guard = self.inner.lock();
        let inner = guard.as_ref().ok_or(CinderError::Closed)?;

        if self.config.fsync_enabled {
            for segment in &inner.segments {
                segment.sync()?;
            }
        }
        Ok(())
    }

    /// Closes every segment. Safe to call exactly once; any operation
    /// afterwards fails.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = guard.take().ok_or(CinderError::Closed)?;

        if self.config.fsync_enabled {
            for segment in &inner.segments {
                segment.sync()?;
            }
        }
        Ok(())
    }
}

impl LogInner {
    fn rotate(&mut self, dir: &Path) -> Result<()> {
        let segment = Segment::create(dir, self.size)?;
        self.segments.push(segment);
        Ok(())
    }

    /// Index of the segment covering `off`: the one with the maximal
    /// `start_offset <= off`.
    fn seek_segment(&self, off: u64) -> Result<usize> {
        self.segments
            .iter()
            .rposition(|s| s.start_offset() <= off)
            .ok_or_else(|| {
                CinderError::CorruptData(format!("no segment covers offset {}", off))
            })
    }
}
