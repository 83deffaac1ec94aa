//! Advisory per-(file, sentence) write locks.
//!
//! A lock is held by exactly one connection. Releasing is idempotent and
//! closing a connection releases everything it held.

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct LockTable {
    held: DashMap<(String, u32), u64>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires (file, sentence) for `conn`. Re-acquiring a lock the
    /// same connection already holds succeeds; a lock held by another
    /// connection is a conflict.
    pub fn try_acquire(&self, file: &str, sentence: u32, conn: u64) -> bool {
        match self.held.entry((file.to_owned(), sentence)) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get() == conn,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(conn);
                true
            }
        }
    }

    /// Releases the lock if `conn` holds it; a no-op otherwise.
    pub fn release(&self, file: &str, sentence: u32, conn: u64) {
        self.held.remove_if(&(file.to_owned(), sentence), |_, holder| *holder == conn);
    }

    /// Drops every lock a connection holds.
    pub fn release_conn(&self, conn: u64) {
        self.held.retain(|_, holder| *holder != conn);
    }

    /// True when any sentence of `file` is locked. Undo, checkpoint and
    /// revert refuse to run while this holds.
    pub fn file_locked(&self, file: &str) -> bool {
        self.held.iter().any(|entry| entry.key().0 == file)
    }
}
