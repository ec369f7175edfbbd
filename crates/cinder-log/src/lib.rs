//! Append-only heap log core.
//!
//! This crate provides:
//! - A segmented append-only `Log` addressed by logical offsets
//! - The heap and table-row record codecs
//! - A buffered sequential scan in which the newest record wins
//! - The `Heap` store: validated `put`/`get` over the log
//! - An offline `Compactor` that rewrites record streams sorted and
//!   deduplicated

mod compact;
mod heap;
mod log;
mod record;
mod scan;
mod segment;

pub use compact::{Compactor, CompactorConfig};
pub use heap::Heap;
pub use log::Log;
pub use record::{
    validate_key, validate_value, DecodeError, HeapLayout, HeapRecord, RecordLayout, RowLayout,
    RowRecord, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
pub use scan::scan_newest;
