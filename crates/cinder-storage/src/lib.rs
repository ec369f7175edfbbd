//! Paged B+ tree storage core.
//!
//! This crate provides:
//! - A `Pager` capability mapping page identifiers to fixed-size blocks,
//!   with file-backed and in-memory implementations
//! - The page codec for variable-length cells
//! - B+ tree operations: find, insert, update, splits up to the root
//! - `MultiLock`, a reference-counted per-page reader-writer lock map

mod codec;
mod multilock;
mod node;
mod pager;
mod tree;

pub use codec::{decode_node, encode_node};
pub use multilock::{MultiLock, PageReadGuard, PageWriteGuard};
pub use node::{Cell, Node};
pub use pager::{FilePager, MemPager, Pager};
pub use tree::BTree;
