//! Error types for the cinder storage core.

use thiserror::Error;

/// Result type alias using CinderError.
pub type Result<T> = std::result::Result<T, CinderError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum CinderError {
    /// The requested key does not exist.
    #[error("Key not found")]
    NotFound,

    /// The key violates a boundary constraint (size bounds or a
    /// disallowed byte).
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The value violates a boundary constraint.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Input could not be decoded at the process boundary.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// An on-disk page violates its encoding invariants.
    #[error("Page corrupted: {page_id}, reason: {reason}")]
    CorruptPage { page_id: u64, reason: String },

    /// An on-disk record stream violates its encoding invariants.
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// The underlying medium was closed; no further operations are
    /// possible on this handle.
    #[error("Storage closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CinderError {
    /// Returns the stable error code exposed at the process boundary.
    ///
    /// External clients match on these numbers, so they must never change:
    /// 1 NotFound, 10 IO, 30 InvalidEncoding, 31 InvalidKey,
    /// 32 InvalidValue, 50 CorruptPage/CorruptData.
    pub fn code(&self) -> i32 {
        match self {
            CinderError::NotFound => 1,
            CinderError::Io(_) | CinderError::Closed => 10,
            CinderError::InvalidEncoding(_) => 30,
            CinderError::InvalidKey(_) => 31,
            CinderError::InvalidValue(_) => 32,
            CinderError::CorruptPage { .. } | CinderError::CorruptData(_) => 50,
        }
    }
}
