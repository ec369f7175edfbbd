//! Per-page reader-writer locks, keyed by page identifier.

use cinder_common::page::PageId;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A concurrent map of reference-counted reader-writer locks.
///
/// Tree operations that touch disjoint pages proceed in parallel; a
/// writer on page *p* excludes only readers and writers of *p*. Entries
/// are ephemeral: the map mutex serializes only map mutation, never the
/// inner lock acquisition, and an entry is removed once no holder or
/// waiter references it. Locking an identifier that has no page yet
/// still serializes against other users of the same identifier.
pub struct MultiLock {
    entries: Mutex<HashMap<PageId, Entry>>,
}

struct Entry {
    lock: Arc<RwLock<()>>,
    refs: usize,
}

impl MultiLock {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the shared lock for a page, blocking while a writer
    /// holds it.
    pub fn read(&self, id: PageId) -> PageReadGuard<'_> {
        let lock = self.acquire(id);
        PageReadGuard {
            locks: self,
            id,
            guard: Some(lock.read_arc()),
        }
    }

    /// Acquires the exclusive lock for a page, blocking while any other
    /// holder exists.
    pub fn write(&self, id: PageId) -> PageWriteGuard<'_> {
        let lock = self.acquire(id);
        PageWriteGuard {
            locks: self,
            id,
            guard: Some(lock.write_arc()),
        }
    }

    /// Looks up or inserts the entry for `id` and counts the caller as a
    /// holder before it blocks on the inner lock, so a concurrent release
    /// can never drop an entry a waiter depends on.
    fn acquire(&self, id: PageId) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(id).or_insert_with(|| Entry {
            lock: Arc::new(RwLock::new(())),
            refs: 0,
        });
        entry.refs += 1;
        entry.lock.clone()
    }

    fn release(&self, id: PageId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&id);
            }
        }
    }

    /// Number of live entries; used by tests to observe cleanup.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for MultiLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a shared page lock.
pub struct PageReadGuard<'a> {
    locks: &'a MultiLock,
    id: PageId,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(self.id);
    }
}

/// RAII guard for an exclusive page lock.
pub struct PageWriteGuard<'a> {
    locks: &'a MultiLock,
    id: PageId,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(self.id);
    }
}
