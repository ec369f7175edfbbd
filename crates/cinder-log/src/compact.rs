//! Offline compaction of heap record streams.

use cinder_common::{CinderError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::record::{DecodeError, HeapRecord};

/// Configuration for the compactor.
#[derive(Debug, Clone)]
pub struct CompactorConfig {
    /// Read buffer size in bytes. Inputs need not fit the buffer;
    /// records straddling reads are merged through an overflow buffer.
    pub buffer_size: usize,
    /// fsync the output file after writing.
    pub fsync_enabled: bool,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            fsync_enabled: true,
        }
    }
}

/// Merge-sorted rewrite of record streams that discards older
/// duplicates per key.
///
/// Sources must be fed newest first: the sort is stable, so the first
/// occurrence kept per key is the newest one. The output file is
/// strictly ascending by key with no duplicates.
pub struct Compactor {
    config: CompactorConfig,
}

impl Compactor {
    pub fn new() -> Self {
        Self::with_config(CompactorConfig::default())
    }

    pub fn with_config(config: CompactorConfig) -> Self {
        Self { config }
    }

    /// Compacts one or more record streams into a fresh file at
    /// `out_path`, returning the synced output file.
    pub fn compact<R: Read>(
        &self,
        sources: impl IntoIterator<Item = R>,
        out_path: &Path,
    ) -> Result<File> {
        let mut records = Vec::new();
        for mut source in sources {
            self.parse_stream(&mut source, &mut records)?;
        }
        let input_count = records.len();

        records.sort_by(|a, b| a.key.cmp(&b.key));
        records.dedup_by(|current, kept| current.key == kept.key);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(out_path)?;
        for record in &records {
            file.write_all(&record.marshal())?;
        }
        if self.config.fsync_enabled {
            file.sync_all()?;
        }

        tracing::debug!(
            input = input_count,
            output = records.len(),
            "compaction complete"
        );
        Ok(file)
    }

    /// Parses records until end-of-stream. Bytes left over from a read
    /// stay buffered until the next read completes the record; leftovers
    /// at end-of-stream mean the input is corrupt.
    fn parse_stream<R: Read>(&self, source: &mut R, records: &mut Vec<HeapRecord>) -> Result<()> {
        let mut overflow: Vec<u8> = Vec::new();

        loop {
            let mut chunk = vec![0u8; self.config.buffer_size];
            let n = read_full(source, &mut chunk)?;
            if n == 0 {
                break;
            }
            overflow.extend_from_slice(&chunk[..n]);

            let mut off = 0;
            loop {
                match HeapRecord::unmarshal(&overflow[off..]) {
                    Ok((record, consumed)) => {
                        records.push(record);
                        off += consumed;
                    }
                    Err(DecodeError::Incomplete) => break,
                    Err(err) => return Err(err.into()),
                }
            }
            overflow.drain(..off);
        }

        if !overflow.is_empty() {
            return Err(CinderError::CorruptData(
                "record truncated at end of stream".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads until `buf` is full or the source is exhausted.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = source.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn encode(records: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in records {
            out.extend_from_slice(&HeapRecord::new(key, value).unwrap().marshal());
        }
        out
    }

    fn decode_all(data: &[u8]) -> Vec<HeapRecord> {
        let mut records = Vec::new();
        let mut off = 0;
        while off < data.len() {
            let (record, consumed) = HeapRecord::unmarshal(&data[off..]).unwrap();
            records.push(record);
            off += consumed;
        }
        records
    }

    fn no_fsync() -> Compactor {
        Compactor::with_config(CompactorConfig {
            buffer_size: 4096,
            fsync_enabled: false,
        })
    }

    #[test]
    fn test_compact_sorts_and_dedupes() {
        // Newest first: the later write of "b" comes before the older one.
        let input = encode(&[(b"b", b"2'"), (b"a", b"1"), (b"b", b"2")]);

        let dir = tempdir().unwrap();
        let out = dir.path().join("compacted");
        no_fsync().compact([Cursor::new(input)], &out).unwrap();

        let records = decode_all(&std::fs::read(&out).unwrap());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.as_ref(), b"a");
        assert_eq!(records[0].value.as_ref(), b"1");
        assert_eq!(records[1].key.as_ref(), b"b");
        assert_eq!(records[1].value.as_ref(), b"2'");
    }

    #[test]
    fn test_compact_output_is_ascending_and_unique() {
        let input = encode(&[
            (b"pear", b"4"),
            (b"apple", b"9"),
            (b"mango", b"2"),
            (b"apple", b"1"),
            (b"fig", b"7"),
            (b"mango", b"0"),
        ]);

        let dir = tempdir().unwrap();
        let out = dir.path().join("compacted");
        no_fsync().compact([Cursor::new(input)], &out).unwrap();

        let records = decode_all(&std::fs::read(&out).unwrap());
        let keys: Vec<&[u8]> = records.iter().map(|r| r.key.as_ref()).collect();
        assert_eq!(
            keys,
            vec![b"apple" as &[u8], b"fig", b"mango", b"pear"]
        );
        // Newest value per key survives.
        assert_eq!(records[0].value.as_ref(), b"9");
        assert_eq!(records[2].value.as_ref(), b"2");
    }

    #[test]
    fn test_compact_multiple_sources_newest_first() {
        let newer = encode(&[(b"k", b"new")]);
        let older = encode(&[(b"k", b"old"), (b"only", b"here")]);

        let dir = tempdir().unwrap();
        let out = dir.path().join("compacted");
        no_fsync()
            .compact([Cursor::new(newer), Cursor::new(older)], &out)
            .unwrap();

        let records = decode_all(&std::fs::read(&out).unwrap());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.as_ref(), b"k");
        assert_eq!(records[0].value.as_ref(), b"new");
        assert_eq!(records[1].key.as_ref(), b"only");
    }

    #[test]
    fn test_compact_records_straddle_reads() {
        // A tiny read buffer forces nearly every record through the
        // overflow path.
        let mut pairs = Vec::new();
        let keys: Vec<String> = (0..50).map(|i| format!("key{:02}", i)).collect();
        let values: Vec<Vec<u8>> = (0..50).map(|i| vec![b'v'; 20 + i]).collect();
        for i in 0..50 {
            pairs.push((keys[i].as_bytes(), values[i].as_slice()));
        }
        let input = encode(&pairs);

        let dir = tempdir().unwrap();
        let out = dir.path().join("compacted");
        let compactor = Compactor::with_config(CompactorConfig {
            buffer_size: 16,
            fsync_enabled: false,
        });
        compactor.compact([Cursor::new(input)], &out).unwrap();

        let records = decode_all(&std::fs::read(&out).unwrap());
        assert_eq!(records.len(), 50);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.key.as_ref(), keys[i].as_bytes());
            assert_eq!(record.value.as_ref(), values[i].as_slice());
        }
    }

    #[test]
    fn test_compact_truncated_input_is_corrupt() {
        let mut input = encode(&[(b"key", b"value")]);
        input.truncate(input.len() - 2);

        let dir = tempdir().unwrap();
        let out = dir.path().join("compacted");
        let result = no_fsync().compact([Cursor::new(input)], &out);

        assert!(matches!(result, Err(CinderError::CorruptData(_))));
    }

    #[test]
    fn test_compact_empty_input() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("compacted");
        no_fsync()
            .compact([Cursor::new(Vec::new())], &out)
            .unwrap();

        assert_eq!(std::fs::read(&out).unwrap().len(), 0);
    }

    #[test]
    fn test_compact_bad_sizes_are_corrupt() {
        // keylen 0 is outside the heap bounds.
        let input = vec![0u8, 0, 0, 0, 0, 1, b'x'];

        let dir = tempdir().unwrap();
        let out = dir.path().join("compacted");
        let result = no_fsync().compact([Cursor::new(input)], &out);

        assert!(matches!(result, Err(CinderError::CorruptData(_))));
    }
}
