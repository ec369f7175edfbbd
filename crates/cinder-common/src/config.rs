//! Configuration structures for the cinder storage core.

use serde::{Deserialize, Serialize};

/// Configuration for the B+ tree file backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Enable fsync after page writes.
    pub fsync_enabled: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            fsync_enabled: true,
        }
    }
}

/// Configuration for the segmented heap log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Maximum byte size of a segment before appends rotate to a new one.
    pub segment_size: u64,
    /// Window size in bytes for the sequential scan.
    pub scan_window: usize,
    /// Enable fsync on log sync.
    pub fsync_enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            segment_size: 16 * 1024 * 1024, // 16 MB
            scan_window: 1024,
            fsync_enabled: true,
        }
    }
}
