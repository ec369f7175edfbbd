//! Encoding and decoding between nodes and raw page buffers.
//!
//! A page starts with the 16-byte header, followed by a packed sequence
//! of `cell_count` cells, all big-endian:
//! - leaf cell: `u32 keylen, key, u32 vallen, value`
//! - internal cell: `u32 keylen, key, u64 child page pointer`
//!
//! The trailing cell of an internal page is the sentinel (keylen 0).

use bytes::Bytes;
use cinder_common::page::{PageHeader, PageId, PAGE_HEADER_SIZE, PAGE_SIZE};
use cinder_common::{CinderError, Result};

use crate::node::{Cell, Node};

/// Encodes a node into a page buffer.
pub fn encode_node(node: &Node) -> Result<[u8; PAGE_SIZE]> {
    let corrupt = |reason: String| CinderError::CorruptPage {
        page_id: node.id.0,
        reason,
    };

    let used = node.used();
    if used > PAGE_SIZE - PAGE_HEADER_SIZE {
        return Err(corrupt(format!("cells exceed page capacity: {} bytes", used)));
    }

    let mut header = PageHeader::new();
    header.parent = node.parent.map(|p| p.offset()).unwrap_or(0);
    header.used = used as u16;
    header.cell_count = node.cells.len() as u16;
    header.set_internal(node.is_internal);

    let mut page = [0u8; PAGE_SIZE];
    page[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());

    let mut offset = PAGE_HEADER_SIZE;
    for cell in &node.cells {
        match cell {
            Cell::Leaf { key, value } => {
                if node.is_internal {
                    return Err(corrupt("leaf cell in internal page".to_string()));
                }
                page[offset..offset + 4].copy_from_slice(&(key.len() as u32).to_be_bytes());
                offset += 4;
                page[offset..offset + key.len()].copy_from_slice(key);
                offset += key.len();
                page[offset..offset + 4].copy_from_slice(&(value.len() as u32).to_be_bytes());
                offset += 4;
                page[offset..offset + value.len()].copy_from_slice(value);
                offset += value.len();
            }
            Cell::Internal { key, child } => {
                if !node.is_internal {
                    return Err(corrupt("pointer cell in leaf page".to_string()));
                }
                let key = key.as_deref().unwrap_or(&[]);
                page[offset..offset + 4].copy_from_slice(&(key.len() as u32).to_be_bytes());
                offset += 4;
                page[offset..offset + key.len()].copy_from_slice(key);
                offset += key.len();
                page[offset..offset + 8].copy_from_slice(&child.offset().to_be_bytes());
                offset += 8;
            }
        }
    }

    Ok(page)
}

/// Decodes a page buffer into a node, validating the layout invariants.
pub fn decode_node(id: PageId, page: &[u8; PAGE_SIZE]) -> Result<Node> {
    let corrupt = |reason: String| CinderError::CorruptPage {
        page_id: id.0,
        reason,
    };

    let header = PageHeader::from_bytes(&page[..PAGE_HEADER_SIZE]);
    let parent = if header.parent == 0 {
        None
    } else {
        Some(PageId::from_offset(header.parent)?)
    };
    let is_internal = header.is_internal();
    let cell_count = header.cell_count as usize;

    let mut cells = Vec::with_capacity(cell_count);
    let mut offset = PAGE_HEADER_SIZE;

    for i in 0..cell_count {
        if offset + 4 > PAGE_SIZE {
            return Err(corrupt(format!("invalid cell count: {}", cell_count)));
        }
        let key_len = u32::from_be_bytes([
            page[offset],
            page[offset + 1],
            page[offset + 2],
            page[offset + 3],
        ]) as usize;
        offset += 4;

        if offset + key_len > PAGE_SIZE {
            return Err(corrupt(format!("key length out of bounds: {}", key_len)));
        }
        let key = Bytes::copy_from_slice(&page[offset..offset + key_len]);
        offset += key_len;

        if is_internal {
            if offset + 8 > PAGE_SIZE {
                return Err(corrupt("pointer cell exceeds page".to_string()));
            }
            let ptr = u64::from_be_bytes([
                page[offset],
                page[offset + 1],
                page[offset + 2],
                page[offset + 3],
                page[offset + 4],
                page[offset + 5],
                page[offset + 6],
                page[offset + 7],
            ]);
            offset += 8;
            let child = PageId::from_offset(ptr)?;

            if key_len == 0 {
                if i + 1 != cell_count {
                    return Err(corrupt("sentinel cell before end of page".to_string()));
                }
                cells.push(Cell::sentinel(child));
            } else {
                cells.push(Cell::Internal {
                    key: Some(key),
                    child,
                });
            }
        } else {
            if key_len == 0 {
                return Err(corrupt("empty key in leaf cell".to_string()));
            }
            if offset + 4 > PAGE_SIZE {
                return Err(corrupt("value length exceeds page".to_string()));
            }
            let val_len = u32::from_be_bytes([
                page[offset],
                page[offset + 1],
                page[offset + 2],
                page[offset + 3],
            ]) as usize;
            offset += 4;

            if offset + val_len > PAGE_SIZE {
                return Err(corrupt(format!("value length out of bounds: {}", val_len)));
            }
            let value = Bytes::copy_from_slice(&page[offset..offset + val_len]);
            offset += val_len;

            cells.push(Cell::Leaf { key, value });
        }
    }

    if is_internal && !cells.last().map(Cell::is_sentinel).unwrap_or(false) {
        return Err(corrupt("internal page missing trailing sentinel".to_string()));
    }

    let keyed = if is_internal {
        &cells[..cells.len().saturating_sub(1)]
    } else {
        &cells[..]
    };
    for pair in keyed.windows(2) {
        if pair[0].key() >= pair[1].key() {
            return Err(corrupt("cell keys not strictly ascending".to_string()));
        }
    }

    let node = Node {
        id,
        parent,
        is_internal,
        cells,
    };

    if node.used() != header.used as usize {
        return Err(corrupt(format!(
            "used mismatch: header says {}, cells occupy {}",
            header.used,
            node.used()
        )));
    }

    Ok(node)
}
