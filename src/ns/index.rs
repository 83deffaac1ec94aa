//! The naming index: a character-keyed trie of file records plus the
//! folder registry, guarded together by one coarse lock.
//!
//! The trie stores identity and invariants, never bytes; content lives
//! only on the storage servers. Interior references are never handed
//! out - readers get copies.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::clock;
use crate::ns::folders::{rewrite_prefix, FolderSet};
use crate::proto::payload::{AclEntry, FileSync, MetadataPatch, ViewArgs};
use crate::proto::{Permission, MAX_ACL_ENTRIES};

/// One file's naming-layer record.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    pub owner: String,
    /// Registry slot of the storage server holding the bytes.
    pub slot: usize,
    pub folder: String,
    pub word_count: u64,
    pub char_count: u64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
    pub acl: Vec<AclEntry>,
}

impl FileRecord {
    pub fn new(name: &str, owner: &str, slot: usize) -> Self {
        let now = clock::now_secs();
        Self {
            name: name.to_owned(),
            owner: owner.to_owned(),
            slot,
            folder: String::new(),
            word_count: 0,
            char_count: 0,
            created: now,
            modified: now,
            last_accessed: now,
            last_accessed_by: String::new(),
            acl: Vec::new(),
        }
    }

    /// Owner implicitly holds all rights; everyone else needs an ACL
    /// entry at or above `perm`.
    pub fn permits(&self, user: &str, perm: Permission) -> bool {
        self.owner == user || self.acl.iter().any(|e| e.user == user && e.perm >= perm)
    }
}

#[derive(Default)]
struct Node {
    children: BTreeMap<u8, Node>,
    record: Option<FileRecord>,
}

impl Node {
    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a FileRecord)) {
        if let Some(record) = &self.record {
            f(record);
        }
        for child in self.children.values() {
            child.walk(f);
        }
    }

    fn walk_mut(&mut self, f: &mut impl FnMut(&mut FileRecord)) {
        if let Some(record) = &mut self.record {
            f(record);
        }
        for child in self.children.values_mut() {
            child.walk_mut(f);
        }
    }
}

#[derive(Default)]
struct Trie {
    root: Node,
}

impl Trie {
    fn get(&self, name: &str) -> Option<&FileRecord> {
        let mut node = &self.root;
        for byte in name.bytes() {
            node = node.children.get(&byte)?;
        }
        node.record.as_ref()
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut FileRecord> {
        let mut node = &mut self.root;
        for byte in name.bytes() {
            node = node.children.get_mut(&byte)?;
        }
        node.record.as_mut()
    }

    /// Inserts a record; refuses to overwrite an existing leaf.
    fn insert(&mut self, record: FileRecord) -> bool {
        let key = record.name.clone();
        let mut node = &mut self.root;
        for byte in key.bytes() {
            node = node.children.entry(byte).or_default();
        }
        if node.record.is_some() {
            return false;
        }
        node.record = Some(record);
        true
    }

    /// Unlinks a record and prunes emptied branches.
    fn remove(&mut self, name: &str) -> Option<FileRecord> {
        fn descend(node: &mut Node, key: &[u8]) -> Option<FileRecord> {
            match key.split_first() {
                None => node.record.take(),
                Some((&byte, rest)) => {
                    let child = node.children.get_mut(&byte)?;
                    let removed = descend(child, rest)?;
                    if child.record.is_none() && child.children.is_empty() {
                        node.children.remove(&byte);
                    }
                    Some(removed)
                }
            }
        }
        descend(&mut self.root, name.as_bytes())
    }
}

#[derive(Debug)]
pub enum DeleteOutcome {
    /// The record is gone; the slot says where to forward the delete.
    Removed(usize),
    NotFound,
    Denied,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    NotFound,
    Denied,
    AclFull,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    NotFound,
    Denied,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Added,
    Refreshed,
    /// Another storage server already claims this filename.
    Conflict(usize),
}

#[derive(Debug)]
pub enum SetFolderOutcome {
    Moved(usize),
    NotFound,
    Denied,
}

/// One file affected by a folder rename, for the set-folder fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderUpdate {
    pub name: String,
    pub folder: String,
    pub slot: usize,
}

#[derive(Debug)]
pub enum MoveFolderOutcome {
    Moved(Vec<FolderUpdate>),
    NotFound,
    Denied,
    Exists,
}

struct State {
    trie: Trie,
    folders: FolderSet,
}

/// The trie and the folder registry behind their shared lock.
pub struct Catalog {
    state: Mutex<State>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self { state: Mutex::new(State { trie: Trie::default(), folders: FolderSet::default() }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a freshly created file. False if the name is taken.
    pub fn add(&self, name: &str, slot: usize, owner: &str) -> bool {
        let added = self.lock().trie.insert(FileRecord::new(name, owner, slot));
        if added {
            info!(%name, slot, %owner, "file added to index");
        }
        added
    }

    /// Which slot holds the file's bytes.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.lock().trie.get(name).map(|r| r.slot)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().trie.get(name).is_some()
    }

    /// False for unknown files as well as missing rights.
    pub fn check_permission(&self, name: &str, user: &str, perm: Permission) -> bool {
        self.lock().trie.get(name).is_some_and(|r| r.permits(user, perm))
    }

    /// Grants `perm` to `target`. Only the owner may grant; granting to
    /// a user already in the ACL updates the entry in place.
    pub fn grant(
        &self,
        name: &str,
        owner: &str,
        target: &str,
        perm: Permission,
    ) -> GrantOutcome {
        let mut state = self.lock();
        let Some(record) = state.trie.get_mut(name) else {
            return GrantOutcome::NotFound;
        };
        if record.owner != owner {
            return GrantOutcome::Denied;
        }
        // the owner already holds every right and never enters the ACL
        if record.owner == target {
            return GrantOutcome::Granted;
        }
        if let Some(entry) = record.acl.iter_mut().find(|e| e.user == target) {
            entry.perm = perm;
        } else if record.acl.len() < MAX_ACL_ENTRIES {
            record.acl.push(AclEntry { user: target.to_owned(), perm });
        } else {
            return GrantOutcome::AclFull;
        }
        GrantOutcome::Granted
    }

    /// Removes `target` from the ACL; removing an absent entry is a
    /// no-op success.
    pub fn revoke(&self, name: &str, owner: &str, target: &str) -> RevokeOutcome {
        let mut state = self.lock();
        let Some(record) = state.trie.get_mut(name) else {
            return RevokeOutcome::NotFound;
        };
        if record.owner != owner {
            return RevokeOutcome::Denied;
        }
        record.acl.retain(|e| e.user != target);
        RevokeOutcome::Revoked
    }

    /// Owner-only unlink; returns the slot for forwarding the delete.
    pub fn delete(&self, name: &str, requester: &str) -> DeleteOutcome {
        let mut state = self.lock();
        match state.trie.get(name) {
            None => DeleteOutcome::NotFound,
            Some(record) if record.owner != requester => DeleteOutcome::Denied,
            Some(_) => match state.trie.remove(name) {
                Some(record) => {
                    info!(%name, slot = record.slot, "file removed from index");
                    DeleteOutcome::Removed(record.slot)
                }
                None => DeleteOutcome::NotFound,
            },
        }
    }

    /// A copy of the record, never an interior reference.
    pub fn details(&self, name: &str) -> Option<FileRecord> {
        self.lock().trie.get(name).cloned()
    }

    /// Storage-server bootstrap: accepts a re-declared file when it is
    /// unknown or previously claimed by the same slot; a claim from a
    /// different slot is rejected and the copy stays orphaned.
    pub fn rebuild_add(&self, slot: usize, sync: &FileSync) -> RebuildOutcome {
        let mut state = self.lock();
        if let Some(existing) = state.trie.get_mut(&sync.filename) {
            if existing.slot != slot {
                warn!(
                    file = %sync.filename,
                    claimed_by = existing.slot,
                    rejected = slot,
                    "conflicting re-registration rejected"
                );
                return RebuildOutcome::Conflict(existing.slot);
            }
            *existing = record_from_sync(slot, sync);
            return RebuildOutcome::Refreshed;
        }
        state.trie.insert(record_from_sync(slot, sync));
        if !sync.folder.is_empty() && !state.folders.contains(&sync.folder) {
            // re-learn folders named by restored files
            state.folders.add(&sync.folder, &sync.owner);
        }
        RebuildOutcome::Added
    }

    /// Drops every record owned by `slot`; returns the removed names so
    /// the caller can invalidate its cache.
    pub fn purge_slot(&self, slot: usize) -> Vec<String> {
        let mut state = self.lock();
        let mut doomed = Vec::new();
        state.trie.root.walk(&mut |record| {
            if record.slot == slot {
                doomed.push(record.name.clone());
            }
        });
        for name in &doomed {
            state.trie.remove(name);
        }
        if !doomed.is_empty() {
            info!(slot, files = doomed.len(), "purged records of dead storage server");
        }
        doomed
    }

    /// Snapshot of (filename, slot) pairs for the metadata refresh
    /// protocol; `folder` narrows to files directly in that folder.
    pub fn files_snapshot(&self, folder: Option<&str>) -> Vec<(String, usize)> {
        let state = self.lock();
        let mut entries = Vec::new();
        state.trie.root.walk(&mut |record| {
            if folder.map_or(true, |f| record.folder == f) {
                entries.push((record.name.clone(), record.slot));
            }
        });
        entries
    }

    /// Patches the stats fields that are authoritative on the storage
    /// server.
    pub fn apply_metadata(&self, name: &str, patch: &MetadataPatch) {
        let mut state = self.lock();
        if let Some(record) = state.trie.get_mut(name) {
            record.word_count = patch.word_count;
            record.char_count = patch.char_count;
            record.modified = patch.modified;
            record.last_accessed = patch.last_accessed;
            record.last_accessed_by = patch.last_accessed_by.clone();
        }
    }

    pub fn add_folder(&self, name: &str, owner: &str) -> bool {
        self.lock().folders.add(name, owner)
    }

    pub fn folder_exists(&self, name: &str) -> bool {
        self.lock().folders.contains(name)
    }

    /// Moves a single file into `folder` (or the root when empty).
    pub fn set_file_folder(&self, name: &str, folder: &str, owner: &str) -> SetFolderOutcome {
        let mut state = self.lock();
        let Some(record) = state.trie.get_mut(name) else {
            return SetFolderOutcome::NotFound;
        };
        if record.owner != owner {
            return SetFolderOutcome::Denied;
        }
        record.folder = folder.to_owned();
        SetFolderOutcome::Moved(record.slot)
    }

    /// Renames `src` to `dst` and rewrites the folder of every file
    /// under it (segment-aligned). Returns the affected files so the
    /// caller can fan the new folder out to their storage servers.
    pub fn move_folder(&self, src: &str, dst: &str, owner: &str) -> MoveFolderOutcome {
        let mut state = self.lock();
        match state.folders.owner(src) {
            None => return MoveFolderOutcome::NotFound,
            Some(folder_owner) if folder_owner != owner => return MoveFolderOutcome::Denied,
            Some(_) => {}
        }
        if state.folders.contains(dst) {
            return MoveFolderOutcome::Exists;
        }
        state.folders.rename(src, dst);

        let mut updates = Vec::new();
        state.trie.root.walk_mut(&mut |record| {
            if let Some(folder) = rewrite_prefix(&record.folder, src, dst) {
                record.folder = folder.clone();
                updates.push(FolderUpdate { name: record.name.clone(), folder, slot: record.slot });
            }
        });
        info!(%src, %dst, files = updates.len(), "folder renamed");
        MoveFolderOutcome::Moved(updates)
    }

    /// Renders the root listing: top-level folders, then files whose
    /// folder field is empty.
    pub fn render_root(&self, user: &str, flags: ViewArgs) -> String {
        let state = self.lock();
        let mut out = String::new();
        for folder in state.folders.top_level() {
            push_folder_row(&mut out, &folder.name, &folder.owner, flags);
        }
        state.trie.root.walk(&mut |record| {
            if record.folder.is_empty() && visible(record, user, flags) {
                push_file_row(&mut out, record, flags);
            }
        });
        out
    }

    /// Renders a folder listing: immediate subfolders, then files whose
    /// folder field equals `folder` exactly.
    pub fn render_folder(&self, folder: &str, user: &str, flags: ViewArgs) -> String {
        let state = self.lock();
        let mut out = String::new();
        if folder.is_empty() {
            drop(state);
            return self.render_root(user, flags);
        }
        for (segment, record) in state.folders.children_of(folder) {
            push_folder_row(&mut out, segment, &record.owner, flags);
        }
        state.trie.root.walk(&mut |record| {
            if record.folder == folder && visible(record, user, flags) {
                push_file_row(&mut out, record, flags);
            }
        });
        out
    }
}

fn record_from_sync(slot: usize, sync: &FileSync) -> FileRecord {
    FileRecord {
        name: sync.filename.clone(),
        owner: sync.owner.clone(),
        slot,
        folder: sync.folder.clone(),
        word_count: sync.word_count,
        char_count: sync.char_count,
        created: sync.created,
        modified: sync.modified,
        last_accessed: sync.last_accessed,
        last_accessed_by: sync.last_accessed_by.clone(),
        acl: sync.acl.clone(),
    }
}

fn visible(record: &FileRecord, user: &str, flags: ViewArgs) -> bool {
    flags.all || record.permits(user, Permission::Read)
}

fn push_folder_row(out: &mut String, name: &str, owner: &str, flags: ViewArgs) {
    if flags.long {
        out.push_str(&format!(
            "| D | {:<10} | {:>5} | {:>5} | {:>16} | {:<5} |\n",
            name, "-", "-", "-", owner
        ));
    } else {
        out.push_str(&format!("[D] {name}\n"));
    }
}

fn push_file_row(out: &mut String, record: &FileRecord, flags: ViewArgs) {
    if flags.long {
        out.push_str(&format!(
            "| F | {:<10} | {:>5} | {:>5} | {:>16} | {:<5} |\n",
            record.name,
            record.word_count,
            record.char_count,
            clock::fmt_minute(record.last_accessed),
            record.owner
        ));
    } else {
        out.push_str(&format!("--> {}\n", record.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync(name: &str, owner: &str) -> FileSync {
        FileSync {
            filename: name.into(),
            owner: owner.into(),
            acl: Vec::new(),
            word_count: 1,
            char_count: 2,
            created: 3,
            modified: 4,
            last_accessed: 5,
            last_accessed_by: String::new(),
            folder: String::new(),
        }
    }

    #[test]
    fn acl_round_trip() {
        let catalog = Catalog::new();
        catalog.add("f", 0, "alice");

        assert!(!catalog.check_permission("f", "bob", Permission::Read));
        assert_eq!(catalog.grant("f", "alice", "bob", Permission::Read), GrantOutcome::Granted);
        assert!(catalog.check_permission("f", "bob", Permission::Read));
        assert!(!catalog.check_permission("f", "bob", Permission::Write));

        // in-place update, not a duplicate
        assert_eq!(catalog.grant("f", "alice", "bob", Permission::Write), GrantOutcome::Granted);
        assert!(catalog.check_permission("f", "bob", Permission::Write));
        assert_eq!(catalog.details("f").unwrap().acl.len(), 1);

        assert_eq!(catalog.revoke("f", "alice", "bob"), RevokeOutcome::Revoked);
        assert!(!catalog.check_permission("f", "bob", Permission::Read));
        // absent entry: no-op
        assert_eq!(catalog.revoke("f", "alice", "bob"), RevokeOutcome::Revoked);
    }

    #[test]
    fn only_the_owner_grants() {
        let catalog = Catalog::new();
        catalog.add("f", 0, "alice");
        assert_eq!(catalog.grant("f", "bob", "carol", Permission::Read), GrantOutcome::Denied);
        assert_eq!(catalog.grant("g", "alice", "bob", Permission::Read), GrantOutcome::NotFound);
    }

    #[test]
    fn owner_never_enters_the_acl() {
        let catalog = Catalog::new();
        catalog.add("f", 0, "alice");
        assert_eq!(catalog.grant("f", "alice", "alice", Permission::Read), GrantOutcome::Granted);
        assert!(catalog.details("f").unwrap().acl.is_empty());
        assert!(catalog.check_permission("f", "alice", Permission::Write));
    }

    #[test]
    fn acl_capacity_is_bounded() {
        let catalog = Catalog::new();
        catalog.add("f", 0, "alice");
        for i in 0..MAX_ACL_ENTRIES {
            assert_eq!(
                catalog.grant("f", "alice", &format!("user{i}"), Permission::Read),
                GrantOutcome::Granted
            );
        }
        assert_eq!(
            catalog.grant("f", "alice", "overflow", Permission::Read),
            GrantOutcome::AclFull
        );
    }

    #[test]
    fn delete_is_owner_only() {
        let catalog = Catalog::new();
        catalog.add("f", 3, "alice");
        assert!(matches!(catalog.delete("f", "bob"), DeleteOutcome::Denied));
        assert!(matches!(catalog.delete("g", "alice"), DeleteOutcome::NotFound));
        assert!(matches!(catalog.delete("f", "alice"), DeleteOutcome::Removed(3)));
        assert_eq!(catalog.find("f"), None);
        assert!(matches!(catalog.delete("f", "alice"), DeleteOutcome::NotFound));
    }

    #[test]
    fn rebuild_keeps_first_claim() {
        let catalog = Catalog::new();
        assert_eq!(catalog.rebuild_add(1, &sync("f", "alice")), RebuildOutcome::Added);
        assert_eq!(catalog.rebuild_add(1, &sync("f", "alice")), RebuildOutcome::Refreshed);
        assert_eq!(catalog.rebuild_add(2, &sync("f", "alice")), RebuildOutcome::Conflict(1));
        assert_eq!(catalog.find("f"), Some(1));
    }

    #[test]
    fn purge_removes_only_the_dead_slot() {
        let catalog = Catalog::new();
        catalog.add("a", 0, "alice");
        catalog.add("b", 1, "alice");
        catalog.add("c", 0, "alice");
        let mut purged = catalog.purge_slot(0);
        purged.sort();
        assert_eq!(purged, vec!["a".to_owned(), "c".to_owned()]);
        assert_eq!(catalog.find("b"), Some(1));
        assert_eq!(catalog.find("a"), None);
    }

    #[test]
    fn folder_rename_cascades_to_files() {
        let catalog = Catalog::new();
        catalog.add_folder("a", "alice");
        catalog.add_folder("a/b", "alice");
        catalog.add("f1", 0, "alice");
        catalog.add("f2", 1, "alice");
        catalog.add("f3", 0, "alice");
        assert!(matches!(catalog.set_file_folder("f1", "a", "alice"), SetFolderOutcome::Moved(0)));
        assert!(matches!(
            catalog.set_file_folder("f2", "a/b", "alice"),
            SetFolderOutcome::Moved(1)
        ));
        assert!(matches!(
            catalog.set_file_folder("f3", "ax", "alice"),
            SetFolderOutcome::Moved(0)
        ));

        let MoveFolderOutcome::Moved(mut updates) = catalog.move_folder("a", "c", "alice") else {
            panic!("move_folder failed");
        };
        updates.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            updates,
            vec![
                FolderUpdate { name: "f1".into(), folder: "c".into(), slot: 0 },
                FolderUpdate { name: "f2".into(), folder: "c/b".into(), slot: 1 },
            ]
        );
        assert_eq!(catalog.details("f3").unwrap().folder, "ax");
        assert!(catalog.folder_exists("c"));
        assert!(!catalog.folder_exists("a"));
    }

    #[test]
    fn move_folder_refuses_existing_destination() {
        let catalog = Catalog::new();
        catalog.add_folder("a", "alice");
        catalog.add_folder("b", "alice");
        assert!(matches!(catalog.move_folder("a", "b", "alice"), MoveFolderOutcome::Exists));
        assert!(matches!(catalog.move_folder("a", "c", "bob"), MoveFolderOutcome::Denied));
        assert!(matches!(catalog.move_folder("x", "y", "alice"), MoveFolderOutcome::NotFound));
    }

    #[test]
    fn root_listing_filters_by_permission() {
        let catalog = Catalog::new();
        catalog.add_folder("docs", "alice");
        catalog.add("mine", 0, "bob");
        catalog.add("theirs", 0, "alice");
        catalog.add("shared", 0, "alice");
        catalog.grant("shared", "alice", "bob", Permission::Read);

        let plain = catalog.render_root("bob", ViewArgs::default());
        assert!(plain.contains("[D] docs"));
        assert!(plain.contains("--> mine"));
        assert!(plain.contains("--> shared"));
        assert!(!plain.contains("--> theirs"));

        let all = catalog.render_root("bob", ViewArgs { all: true, long: false });
        assert!(all.contains("--> theirs"));
    }

    #[test]
    fn folder_listing_shows_immediate_children() {
        let catalog = Catalog::new();
        catalog.add_folder("a", "alice");
        catalog.add_folder("a/b", "alice");
        catalog.add_folder("a/b/c", "alice");
        catalog.add("inside", 0, "alice");
        catalog.set_file_folder("inside", "a", "alice");
        catalog.add("deeper", 0, "alice");
        catalog.set_file_folder("deeper", "a/b", "alice");

        let listing = catalog.render_folder("a", "alice", ViewArgs::default());
        assert!(listing.contains("[D] b"));
        assert!(!listing.contains("[D] c"));
        assert!(listing.contains("--> inside"));
        assert!(!listing.contains("--> deeper"));
    }
}
