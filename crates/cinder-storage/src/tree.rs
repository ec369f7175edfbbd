//! B+ tree operations over a paged medium.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use cinder_common::page::{PageId, PAGE_HEADER_SIZE, PAGE_SIZE};
use cinder_common::{CinderError, Result, TreeConfig};

use crate::codec::{decode_node, encode_node};
use crate::multilock::MultiLock;
use crate::node::{Cell, Node};
use crate::pager::{FilePager, Pager};

/// A disk-resident B+ tree of variable-length cells.
///
/// The tree owns its pager exclusively; closing the tree closes the
/// underlying medium. Page allocation is append-only: a high-water-mark
/// counter hands out fresh identifiers and nothing is ever freed.
pub struct BTree<P: Pager> {
    pager: P,
    locks: MultiLock,
    /// Next unallocated page identifier.
    high_water: AtomicU64,
}

impl BTree<FilePager> {
    /// Opens the tree file at `path`, creating it when absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, TreeConfig::default())
    }

    /// Opens the tree file at `path` with an explicit configuration.
    pub fn open_with(path: impl AsRef<Path>, config: TreeConfig) -> Result<Self> {
        Self::with_pager(FilePager::open(path, config)?)
    }
}

impl<P: Pager> BTree<P> {
    /// Builds a tree over any pager, initializing the file layout
    /// (reserved header page plus an empty root leaf) when the medium
    /// is empty.
    pub fn with_pager(pager: P) -> Result<Self> {
        if pager.page_count()? < 2 {
            pager.store(PageId(0), &[0u8; PAGE_SIZE])?;
            let root = Node::new_leaf(PageId::ROOT, None);
            pager.store(PageId::ROOT, &encode_node(&root)?)?;
            pager.sync()?;
            tracing::debug!("initialized tree file");
        }

        let next = pager.page_count()?.max(2);
        Ok(Self {
            pager,
            locks: MultiLock::new(),
            high_water: AtomicU64::new(next),
        })
    }

    /// Looks up the value stored for `key`.
    pub fn find(&self, key: &[u8]) -> Result<Vec<u8>> {
        validate_key(key)?;

        let leaf = self.descend_to_leaf(key)?;
        match leaf.find_cell(key) {
            Some(idx) => match &leaf.cells[idx] {
                Cell::Leaf { value, .. } => Ok(value.to_vec()),
                Cell::Internal { .. } => Err(CinderError::CorruptPage {
                    page_id: leaf.id.0,
                    reason: "pointer cell in leaf page".to_string(),
                }),
            },
            None => Err(CinderError::NotFound),
        }
    }

    /// Inserts a key-value pair, splitting pages as needed.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let cell = Cell::leaf(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        validate_cell_size(&cell)?;

        loop {
            let target = self.descend_to_leaf(key)?;

            let guard = self.locks.write(target.id);
            let mut leaf = self.load_node(target.id)?;
            if leaf.is_internal {
                // The page changed roles under a concurrent split;
                // descend again.
                drop(guard);
                continue;
            }

            if leaf.free() >= cell.size() {
                leaf.insert_leaf_cell(cell.clone());
                self.pager.store(leaf.id, &encode_node(&leaf)?)?;
                drop(guard);
                return self.pager.sync();
            }

            // Split phase; runs without the descent locks held.
            drop(guard);
            return self.split_insert(leaf, cell.clone());
        }
    }

    /// Replaces the value stored for `key`. Returns false when the key
    /// is absent. An update whose new cell exceeds the free space after
    /// removing the old one promotes into a split.
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        validate_key(key)?;
        let cell = Cell::leaf(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        validate_cell_size(&cell)?;

        loop {
            let target = self.descend_to_leaf(key)?;

            let guard = self.locks.write(target.id);
            let mut leaf = self.load_node(target.id)?;
            if leaf.is_internal {
                drop(guard);
                continue;
            }

            let idx = match leaf.find_cell(key) {
                Some(idx) => idx,
                None => return Ok(false),
            };

            let old_size = leaf.cells[idx].size();
            if cell.size() <= old_size || leaf.free() + old_size >= cell.size() {
                leaf.cells[idx] = cell.clone();
                self.pager.store(leaf.id, &encode_node(&leaf)?)?;
                drop(guard);
                self.pager.sync()?;
                return Ok(true);
            }

            leaf.cells.remove(idx);
            drop(guard);
            self.split_insert(leaf, cell.clone())?;
            return Ok(true);
        }
    }

    /// Flushes prior stores to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.pager.sync()
    }

    /// Closes the tree and its underlying medium.
    pub fn close(&self) -> Result<()> {
        self.pager.close()
    }

    /// Descends from the root to the leaf responsible for `key`,
    /// crabbing read locks: each child's lock is acquired before the
    /// parent's is released.
    fn descend_to_leaf(&self, key: &[u8]) -> Result<Node> {
        let mut guard = self.locks.read(PageId::ROOT);
        let mut node = self.load_node(PageId::ROOT)?;

        while node.is_internal {
            let child = node.child_for(key)?;
            let next = self.locks.read(child);
            guard = next;
            node = self.load_node(child)?;
        }

        // Cells were copied out of the page buffer at decode time, so the
        // lock can be released before the node is handed to the caller.
        drop(guard);
        Ok(node)
    }

    fn load_node(&self, id: PageId) -> Result<Node> {
        let page = self.pager.load(id)?;
        decode_node(id, &page)
    }

    /// Atomically hands out the next unallocated page identifier.
    fn alloc_page_id(&self) -> PageId {
        PageId(self.high_water.fetch_add(1, Ordering::SeqCst))
    }

    /// Splits `node` around `incoming` and persists every modified page.
    fn split_insert(&self, node: Node, incoming: Cell) -> Result<()> {
        let mut dirty = HashMap::new();
        self.split(node, incoming, &mut dirty)?;
        self.flush(&dirty)
    }

    /// Recursive split: merge the incoming cell, partition around the
    /// pivot, promote a separator into the parent, and cascade when the
    /// parent is full. Modified nodes accumulate in `dirty`.
    fn split(&self, mut node: Node, incoming: Cell, dirty: &mut HashMap<PageId, Node>) -> Result<()> {
        match incoming {
            Cell::Leaf { .. } => node.insert_leaf_cell(incoming),
            Cell::Internal {
                key: Some(key),
                child,
            } => node.insert_separator(key, child)?,
            Cell::Internal { key: None, .. } => {
                return Err(CinderError::CorruptPage {
                    page_id: node.id.0,
                    reason: "sentinel cell promoted into a split".to_string(),
                })
            }
        }

        let cells = std::mem::take(&mut node.cells);
        let half = (cells.len() - 1) / 2;
        let mut left_cells = cells[..=half].to_vec();
        let mut right_cells = cells[half + 1..].to_vec();

        let separator = if node.is_internal {
            promote_separator(node.id, &mut left_cells, &mut right_cells)?
        } else {
            match right_cells.first() {
                Some(cell) => Bytes::copy_from_slice(cell.key()),
                None => {
                    return Err(CinderError::CorruptPage {
                        page_id: node.id.0,
                        reason: "split produced an empty right half".to_string(),
                    })
                }
            }
        };

        if node.is_root() {
            // Both halves move to fresh pages; the root page is rewritten
            // in place so its identifier stays fixed.
            let left_id = self.alloc_page_id();
            let right_id = self.alloc_page_id();
            let left = Node {
                id: left_id,
                parent: Some(PageId::ROOT),
                is_internal: node.is_internal,
                cells: left_cells,
            };
            let right = Node {
                id: right_id,
                parent: Some(PageId::ROOT),
                is_internal: node.is_internal,
                cells: right_cells,
            };
            if node.is_internal {
                self.reparent(&left, dirty)?;
                self.reparent(&right, dirty)?;
            }
            let root = Node {
                id: PageId::ROOT,
                parent: None,
                is_internal: true,
                cells: vec![Cell::separator(separator, left_id), Cell::sentinel(right_id)],
            };
            tracing::debug!(left = %left_id, right = %right_id, "root split");
            dirty.insert(left_id, left);
            dirty.insert(right_id, right);
            dirty.insert(PageId::ROOT, root);
            return Ok(());
        }

        let parent_id = node.parent.ok_or_else(|| CinderError::CorruptPage {
            page_id: node.id.0,
            reason: "non-root page without parent".to_string(),
        })?;

        // The left half keeps the original page; the right half moves to
        // a fresh one and takes the old node's position in the parent.
        let right_id = self.alloc_page_id();
        let left = Node {
            id: node.id,
            parent: Some(parent_id),
            is_internal: node.is_internal,
            cells: left_cells,
        };
        let right = Node {
            id: right_id,
            parent: Some(parent_id),
            is_internal: node.is_internal,
            cells: right_cells,
        };
        if node.is_internal {
            self.reparent(&right, dirty)?;
        }
        tracing::debug!(page = %node.id, right = %right_id, "page split");
        dirty.insert(left.id, left);
        dirty.insert(right_id, right);

        let mut parent = self.load_for_split(parent_id, dirty)?;
        let promoted = Cell::separator(separator.clone(), right_id);
        if parent.free() >= promoted.size() {
            parent.insert_separator(separator, right_id)?;
            dirty.insert(parent_id, parent);
            return Ok(());
        }

        // The parent is full too; the promotion cascades upward.
        self.split(parent, promoted, dirty)
    }

    /// Rewrites the parent pointer of every child referenced by `parent`.
    /// Needed when an internal node's cells move to a page with a new
    /// identifier.
    fn reparent(&self, parent: &Node, dirty: &mut HashMap<PageId, Node>) -> Result<()> {
        for cell in &parent.cells {
            if let Cell::Internal { child, .. } = cell {
                let mut child_node = self.load_for_split(*child, dirty)?;
                child_node.parent = Some(parent.id);
                dirty.insert(*child, child_node);
            }
        }
        Ok(())
    }

    /// Loads a node during the split phase, preferring the in-flight
    /// write set over the pager.
    fn load_for_split(&self, id: PageId, dirty: &HashMap<PageId, Node>) -> Result<Node> {
        if let Some(node) = dirty.get(&id) {
            return Ok(node.clone());
        }
        let _guard = self.locks.read(id);
        self.load_node(id)
    }

    /// Persists the write set page by page, then syncs once. All pages
    /// are encoded before the first store so an encoding failure aborts
    /// with nothing written; a failed store aborts before the next one.
    fn flush(&self, dirty: &HashMap<PageId, Node>) -> Result<()> {
        let mut pages = Vec::with_capacity(dirty.len());
        for node in dirty.values() {
            pages.push((node.id, encode_node(node)?));
        }

        for (id, page) in &pages {
            let _guard = self.locks.write(*id);
            self.pager.store(*id, page)?;
        }
        self.pager.sync()
    }
}

/// Promotes the separator between the halves of an internal split.
///
/// The first key of the right half becomes the separator; the pointer
/// paired with it covers the keys below that separator and becomes the
/// left half's trailing sentinel. When the right half holds only the old
/// sentinel, the last separator of the left half is promoted instead.
fn promote_separator(
    page: PageId,
    left: &mut Vec<Cell>,
    right: &mut Vec<Cell>,
) -> Result<Bytes> {
    let corrupt = |reason: &str| CinderError::CorruptPage {
        page_id: page.0,
        reason: reason.to_string(),
    };

    let promoted = if matches!(right.first(), Some(Cell::Internal { key: Some(_), .. })) {
        right.remove(0)
    } else {
        left.pop()
            .ok_or_else(|| corrupt("split produced an empty left half"))?
    };

    match promoted {
        Cell::Internal {
            key: Some(key),
            child,
        } => {
            left.push(Cell::sentinel(child));
            Ok(key)
        }
        _ => Err(corrupt("promoted cell without a separator key")),
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(CinderError::InvalidKey(
            "key must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_cell_size(cell: &Cell) -> Result<()> {
    if cell.size() > PAGE_SIZE - PAGE_HEADER_SIZE {
        return Err(CinderError::InvalidValue(format!(
            "cell of {} bytes can never fit a page",
            cell.size()
        )));
    }
    Ok(())
}
