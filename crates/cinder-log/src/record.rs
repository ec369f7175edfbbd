//! Binary record layouts for the heap and table paths.
//!
//! Two codecs exist side by side and are intentionally kept distinct:
//! heap records carry a `u16` key length, table rows a `u32` one. Both
//! are big-endian with no end-of-stream framing.

use bytes::{BufMut, Bytes, BytesMut};
use cinder_common::{CinderError, Result};

/// The maximum byte size of heap keys.
pub const MAX_KEY_SIZE: usize = 256;

/// The maximum byte size of heap values.
pub const MAX_VALUE_SIZE: usize = 1024;

/// Why a record could not be decoded from a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ends before the record does; more input may complete
    /// it. Only terminal when no more input exists.
    Incomplete,
    /// The declared key size violates the layout bounds.
    KeySize(usize),
    /// The declared value size violates the layout bounds.
    ValueSize(usize),
}

impl From<DecodeError> for CinderError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Incomplete => {
                CinderError::CorruptData("record truncated at end of stream".to_string())
            }
            DecodeError::KeySize(size) => {
                CinderError::CorruptData(format!("record key size out of bounds: {}", size))
            }
            DecodeError::ValueSize(size) => {
                CinderError::CorruptData(format!("record value size out of bounds: {}", size))
            }
        }
    }
}

/// A record wire layout: a fixed-width header encoding the key and
/// value sizes, followed by the key and value bytes.
pub trait RecordLayout {
    /// Number of header bytes before the key.
    const HEADER_LEN: usize;

    /// Decodes `(key_len, value_len)` from a header.
    fn read_header(buf: &[u8]) -> (usize, usize);
}

/// Heap record layout: `u16` key length, `u32` value length.
pub struct HeapLayout;

impl RecordLayout for HeapLayout {
    const HEADER_LEN: usize = 6;

    fn read_header(buf: &[u8]) -> (usize, usize) {
        let key_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let val_len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
        (key_len, val_len)
    }
}

/// Table row layout: `u32` key length, `u32` value length.
pub struct RowLayout;

impl RecordLayout for RowLayout {
    const HEADER_LEN: usize = 8;

    fn read_header(buf: &[u8]) -> (usize, usize) {
        let key_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let val_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        (key_len, val_len)
    }
}

/// Validates a heap key at the process boundary: size bounds plus the
/// legacy no-interior-NUL constraint preserved for wire compatibility.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_SIZE {
        return Err(CinderError::InvalidKey(format!(
            "size not in [1,{}]: {}",
            MAX_KEY_SIZE,
            key.len()
        )));
    }
    if key.contains(&0) {
        return Err(CinderError::InvalidKey("contains a NUL byte".to_string()));
    }
    Ok(())
}

/// Validates a heap value at the process boundary.
pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.is_empty() || value.len() > MAX_VALUE_SIZE {
        return Err(CinderError::InvalidValue(format!(
            "size not in [1,{}]: {}",
            MAX_VALUE_SIZE,
            value.len()
        )));
    }
    if value.contains(&0) {
        return Err(CinderError::InvalidValue("contains a NUL byte".to_string()));
    }
    Ok(())
}

/// A heap record: `⟨u16 keylen, u32 vallen, key, value⟩`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapRecord {
    pub key: Bytes,
    pub value: Bytes,
}

impl HeapRecord {
    /// Builds a record after validating the boundary constraints.
    pub fn new(key: &[u8], value: &[u8]) -> Result<Self> {
        validate_key(key)?;
        validate_value(value)?;
        Ok(Self {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        })
    }

    /// Encoded size on disk.
    pub fn disk_len(&self) -> usize {
        HeapLayout::HEADER_LEN + self.key.len() + self.value.len()
    }

    /// Encodes the record.
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.disk_len());
        buf.put_u16(self.key.len() as u16);
        buf.put_u32(self.value.len() as u32);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.freeze()
    }

    /// Decodes one record from the front of `data`, returning it along
    /// with the number of bytes consumed.
    pub fn unmarshal(data: &[u8]) -> std::result::Result<(Self, usize), DecodeError> {
        if data.len() < HeapLayout::HEADER_LEN {
            return Err(DecodeError::Incomplete);
        }

        let (key_len, val_len) = HeapLayout::read_header(data);
        if key_len == 0 || key_len > MAX_KEY_SIZE {
            return Err(DecodeError::KeySize(key_len));
        }
        if val_len == 0 || val_len > MAX_VALUE_SIZE {
            return Err(DecodeError::ValueSize(val_len));
        }

        let total = HeapLayout::HEADER_LEN + key_len + val_len;
        if data.len() < total {
            return Err(DecodeError::Incomplete);
        }

        let key_start = HeapLayout::HEADER_LEN;
        let record = Self {
            key: Bytes::copy_from_slice(&data[key_start..key_start + key_len]),
            value: Bytes::copy_from_slice(&data[key_start + key_len..total]),
        };
        Ok((record, total))
    }
}

/// A table row: `⟨u32 keylen, u32 vallen, key, value⟩`. Encoded by the
/// external table caller; the core treats key and value as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    pub key: Bytes,
    pub value: Bytes,
}

impl RowRecord {
    pub fn new(key: &[u8], value: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(CinderError::InvalidKey("empty key".to_string()));
        }
        if value.is_empty() {
            return Err(CinderError::InvalidValue("empty value".to_string()));
        }
        Ok(Self {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        })
    }

    pub fn disk_len(&self) -> usize {
        RowLayout::HEADER_LEN + self.key.len() + self.value.len()
    }

    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.disk_len());
        buf.put_u32(self.key.len() as u32);
        buf.put_u32(self.value.len() as u32);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.freeze()
    }

    pub fn unmarshal(data: &[u8]) -> std::result::Result<(Self, usize), DecodeError> {
        if data.len() < RowLayout::HEADER_LEN {
            return Err(DecodeError::Incomplete);
        }

        let (key_len, val_len) = RowLayout::read_header(data);
        if key_len == 0 {
            return Err(DecodeError::KeySize(0));
        }
        if val_len == 0 {
            return Err(DecodeError::ValueSize(0));
        }

        let total = RowLayout::HEADER_LEN + key_len + val_len;
        if data.len() < total {
            return Err(DecodeError::Incomplete);
        }

        let key_start = RowLayout::HEADER_LEN;
        let record = Self {
            key: Bytes::copy_from_slice(&data[key_start..key_start + key_len]),
            value: Bytes::copy_from_slice(&data[key_start + key_len..total]),
        };
        Ok((record, total))
    }
}
