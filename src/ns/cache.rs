//! A small LRU cache in front of trie lookups.
//!
//! Holds filename to slot mappings only, so a stale entry can never
//! corrupt state - at worst it names an inactive slot, which callers
//! must check anyway. Eviction picks the slot with the smallest
//! last-used stamp; a monotonic counter stands in for wall time so
//! same-second lookups still order strictly.

use std::sync::Mutex;

use tracing::debug;

/// Default capacity of the lookup cache.
pub const CACHE_SIZE: usize = 16;

struct Entry {
    name: String,
    slot: usize,
    stamp: u64,
}

struct State {
    entries: Vec<Option<Entry>>,
    clock: u64,
}

pub struct LookupCache {
    state: Mutex<State>,
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::with_capacity(CACHE_SIZE)
    }
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self { state: Mutex::new(State { entries, clock: 0 }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A hit renews the entry's stamp and returns its slot without
    /// touching the trie.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        let mut state = self.lock();
        state.clock += 1;
        let now = state.clock;
        for entry in state.entries.iter_mut().flatten() {
            if entry.name == name {
                entry.stamp = now;
                debug!(%name, slot = entry.slot, "cache hit");
                return Some(entry.slot);
            }
        }
        debug!(%name, "cache miss");
        None
    }

    /// Inserts into the first empty slot, or evicts the least recently
    /// used entry. An existing entry for the name is refreshed.
    pub fn insert(&self, name: &str, slot: usize) {
        let mut state = self.lock();
        state.clock += 1;
        let stamp = state.clock;

        let mut existing = None;
        let mut empty = None;
        let mut lru: Option<(usize, u64)> = None;
        for (i, entry) in state.entries.iter().enumerate() {
            match entry {
                Some(e) if e.name == name => {
                    existing = Some(i);
                    break;
                }
                Some(e) => {
                    if lru.map_or(true, |(_, oldest)| e.stamp < oldest) {
                        lru = Some((i, e.stamp));
                    }
                }
                None => {
                    if empty.is_none() {
                        empty = Some(i);
                    }
                }
            }
        }
        let victim = existing.or(empty).or(lru.map(|(i, _)| i)).unwrap_or(0);
        state.entries[victim] = Some(Entry { name: name.to_owned(), slot, stamp });
    }

    /// Clears the entry for `name`, if cached. Invoked on delete, on
    /// storage-server purge and on folder renames of the file.
    pub fn invalidate(&self, name: &str) {
        let mut state = self.lock();
        for entry in &mut state.entries {
            if entry.as_ref().is_some_and(|e| e.name == name) {
                *entry = None;
                debug!(%name, "cache entry invalidated");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_insert() {
        let cache = LookupCache::new();
        cache.insert("a", 3);
        assert_eq!(cache.lookup("a"), Some(3));
        assert_eq!(cache.lookup("b"), None);
    }

    #[test]
    fn lru_discipline() {
        let cache = LookupCache::new();
        for i in 0..CACHE_SIZE {
            cache.insert(&format!("f{i}"), i);
        }
        // one more distinct insert evicts the oldest entry, f0
        cache.insert("extra", 99);
        assert_eq!(cache.lookup("f0"), None);
        assert_eq!(cache.lookup("f1"), Some(1));
        assert_eq!(cache.lookup("extra"), Some(99));
    }

    #[test]
    fn lookup_renews_an_entry() {
        let cache = LookupCache::new();
        for i in 0..CACHE_SIZE {
            cache.insert(&format!("f{i}"), i);
        }
        // touching f0 makes f1 the eviction victim instead
        assert_eq!(cache.lookup("f0"), Some(0));
        cache.insert("extra", 99);
        assert_eq!(cache.lookup("f0"), Some(0));
        assert_eq!(cache.lookup("f1"), None);
    }

    #[test]
    fn reinserting_a_name_updates_in_place() {
        let cache = LookupCache::new();
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.lookup("a"), Some(2));
    }

    #[test]
    fn invalidate_clears_only_the_name() {
        let cache = LookupCache::new();
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.invalidate("a");
        assert_eq!(cache.lookup("a"), None);
        assert_eq!(cache.lookup("b"), Some(2));
    }
}
