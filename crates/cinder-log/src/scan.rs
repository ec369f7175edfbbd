//! Buffered sequential scan over a record log.

use cinder_common::{CinderError, Result};

use crate::log::Log;
use crate::record::RecordLayout;

/// Scans the whole log for `key` and returns the value of the newest
/// record bearing it, or `None` when the key never appears.
///
/// The log is read in fixed-size windows. A record whose key length
/// differs from the query key is skipped without comparing bytes; a
/// record straddling its window is completed by reading a tail
/// extension of the missing byte count. The last match wins, because a
/// later append supersedes every earlier record with the same key.
/// Running out of stream in the middle of a record header means the
/// data on disk is corrupt.
pub fn scan_newest<L: RecordLayout>(
    log: &Log,
    key: &[u8],
    window: usize,
) -> Result<Option<Vec<u8>>> {
    let mut newest = None;
    let mut off = 0u64;

    loop {
        let mut buf = vec![0u8; window];
        let n = log.read_at(&mut buf, off)?;
        if n == 0 {
            break;
        }
        if n < L::HEADER_LEN {
            return Err(CinderError::CorruptData(format!(
                "record header truncated at offset {}",
                off
            )));
        }
        buf.truncate(n);

        let (key_len, val_len) = L::read_header(&buf);
        let total = L::HEADER_LEN + key_len + val_len;

        if key_len != key.len() {
            off += total as u64;
            continue;
        }

        if total > buf.len() {
            // The record straddles the window; fetch the missing tail.
            let mut tail = vec![0u8; total - buf.len()];
            let read = log.read_at(&mut tail, off + buf.len() as u64)?;
            if read < tail.len() {
                return Err(CinderError::CorruptData(format!(
                    "record truncated at offset {}",
                    off
                )));
            }
            buf.extend_from_slice(&tail);
        }

        let value_start = L::HEADER_LEN + key_len;
        if &buf[L::HEADER_LEN..value_start] == key {
            // Materialize a copy and keep scanning; the most recent
            // record wins.
            newest = Some(buf[value_start..total].to_vec());
        }

        off += total as u64;
    }

    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{HeapLayout, HeapRecord, RowLayout, RowRecord};
    use cinder_common::LogConfig;
    use tempfile::tempdir;

    fn test_log(dir: &std::path::Path) -> Log {
        Log::open_with(
            dir,
            LogConfig {
                segment_size: 1024 * 1024,
                scan_window: 1024,
                fsync_enabled: false,
            },
        )
        .unwrap()
    }

    fn put_heap(log: &Log, key: &[u8], value: &[u8]) {
        let record = HeapRecord::new(key, value).unwrap();
        log.append(&record.marshal()).unwrap();
    }

    #[test]
    fn test_scan_finds_single_record() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        put_heap(&log, b"key", b"value");

        let found = scan_newest::<HeapLayout>(&log, b"key", 1024).unwrap();
        assert_eq!(found, Some(b"value".to_vec()));
    }

    #[test]
    fn test_scan_returns_none_for_absent_key() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        put_heap(&log, b"key", b"value");

        assert_eq!(scan_newest::<HeapLayout>(&log, b"other", 1024).unwrap(), None);
        // Same length as a stored key, different bytes.
        assert_eq!(scan_newest::<HeapLayout>(&log, b"kez", 1024).unwrap(), None);
    }

    #[test]
    fn test_scan_newest_wins() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());

        put_heap(&log, b"color", b"red");
        put_heap(&log, b"other", b"noise");
        put_heap(&log, b"color", b"green");

        let found = scan_newest::<HeapLayout>(&log, b"color", 1024).unwrap();
        assert_eq!(found, Some(b"green".to_vec()));
    }

    #[test]
    fn test_scan_record_straddles_window() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());

        // A run of records followed by one whose tail crosses the
        // 64-byte scan window.
        put_heap(&log, b"aa", &[b'x'; 40]);
        put_heap(&log, b"straddler", &[b'y'; 200]);
        put_heap(&log, b"zz", &[b'z'; 30]);

        let found = scan_newest::<HeapLayout>(&log, b"straddler", 64).unwrap();
        assert_eq!(found, Some(vec![b'y'; 200]));

        let found = scan_newest::<HeapLayout>(&log, b"zz", 64).unwrap();
        assert_eq!(found, Some(vec![b'z'; 30]));
    }

    #[test]
    fn test_scan_truncated_header_is_corrupt() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());

        put_heap(&log, b"key", b"value");
        // Trailing garbage shorter than a record header.
        log.append(&[0x00, 0x01]).unwrap();

        assert!(matches!(
            scan_newest::<HeapLayout>(&log, b"key", 1024),
            Err(CinderError::CorruptData(_))
        ));
    }

    #[test]
    fn test_scan_truncated_record_is_corrupt() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());

        // A header promising more bytes than the log holds.
        let record = HeapRecord::new(b"key", b"value").unwrap();
        let data = record.marshal();
        log.append(&data[..data.len() - 2]).unwrap();

        assert!(matches!(
            scan_newest::<HeapLayout>(&log, b"key", 1024),
            Err(CinderError::CorruptData(_))
        ));
    }

    #[test]
    fn test_scan_row_layout() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());

        let rows = [
            RowRecord::new(b"user:1", b"alice").unwrap(),
            RowRecord::new(b"user:2", b"bob").unwrap(),
            RowRecord::new(b"user:1", b"carol").unwrap(),
        ];
        for row in &rows {
            log.append(&row.marshal()).unwrap();
        }

        let found = scan_newest::<RowLayout>(&log, b"user:1", 1024).unwrap();
        assert_eq!(found, Some(b"carol".to_vec()));
        let found = scan_newest::<RowLayout>(&log, b"user:2", 1024).unwrap();
        assert_eq!(found, Some(b"bob".to_vec()));
    }

    #[test]
    fn test_scan_across_rotated_segments() {
        let dir = tempdir().unwrap();
        let log = Log::open_with(
            dir.path(),
            LogConfig {
                segment_size: 64,
                scan_window: 32,
                fsync_enabled: false,
            },
        )
        .unwrap();

        for i in 0..20u32 {
            let key = format!("key{:02}", i);
            let value = format!("value{:02}", i);
            put_heap(&log, key.as_bytes(), value.as_bytes());
        }

        for i in 0..20u32 {
            let key = format!("key{:02}", i);
            let value = format!("value{:02}", i);
            let found = scan_newest::<HeapLayout>(&log, key.as_bytes(), 32).unwrap();
            assert_eq!(found, Some(value.into_bytes()));
        }
    }
}
