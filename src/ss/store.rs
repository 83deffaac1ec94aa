//! The storage server's file metadata table.
//!
//! One row per stored file, held in memory and rewritten in full to
//! `metadata/metadata.txt` on every mutation. Each line is
//! comma-separated: `filename,size,word_count,created,modified,
//! last_accessed,last_accessed_by,owner,folder,acl_count,acl_entries`,
//! where `acl_entries` is `user:perm;user:perm;...` and `-` marks an
//! unset scalar field.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use num_traits::{FromPrimitive, ToPrimitive};
use tracing::warn;

use crate::clock;
use crate::proto::payload::AclEntry;
use crate::proto::{Permission, MAX_ACL_ENTRIES};
use crate::ss::layout::Layout;
use crate::ss::sentence;

/// One file's metadata row.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub word_count: u64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
    pub owner: String,
    pub folder: String,
    pub acl: Vec<AclEntry>,
}

impl FileMeta {
    fn new(name: &str, size: u64, word_count: u64) -> Self {
        let now = clock::now_secs();
        Self {
            name: name.to_owned(),
            size,
            word_count,
            created: now,
            modified: now,
            last_accessed: now,
            last_accessed_by: String::new(),
            owner: String::new(),
            folder: String::new(),
            acl: Vec::new(),
        }
    }
}

/// Process-scope metadata store.
pub struct MetaStore {
    path: PathBuf,
    files_dir: PathBuf,
    table: Mutex<Vec<FileMeta>>,
}

fn opt_field(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn parse_opt(s: &str) -> String {
    if s == "-" {
        String::new()
    } else {
        s.to_owned()
    }
}

fn render_line(meta: &FileMeta) -> String {
    let acl: String = meta
        .acl
        .iter()
        .map(|e| format!("{}:{};", e.user, e.perm.to_u32().unwrap_or(0)))
        .collect();
    format!(
        "{},{},{},{},{},{},{},{},{},{},{}",
        meta.name,
        meta.size,
        meta.word_count,
        meta.created,
        meta.modified,
        meta.last_accessed,
        opt_field(&meta.last_accessed_by),
        opt_field(&meta.owner),
        opt_field(&meta.folder),
        meta.acl.len(),
        acl,
    )
}

fn parse_line(line: &str) -> Option<FileMeta> {
    let mut fields = line.splitn(11, ',');
    let name = fields.next()?.to_owned();
    let size = fields.next()?.parse().ok()?;
    let word_count = fields.next()?.parse().ok()?;
    let created = fields.next()?.parse().ok()?;
    let modified = fields.next()?.parse().ok()?;
    let last_accessed = fields.next()?.parse().ok()?;
    let last_accessed_by = parse_opt(fields.next()?);
    let owner = parse_opt(fields.next()?);
    let folder = parse_opt(fields.next()?);
    let acl_count: usize = fields.next()?.parse().ok()?;
    let mut acl = Vec::new();
    if let Some(rest) = fields.next() {
        for entry in rest.split(';').filter(|s| !s.is_empty()) {
            let (user, perm) = entry.split_once(':')?;
            let perm = Permission::from_u32(perm.parse().ok()?)?;
            if acl.len() < MAX_ACL_ENTRIES {
                acl.push(AclEntry { user: user.to_owned(), perm });
            }
        }
    }
    if acl.len() != acl_count {
        warn!(file = %name, "metadata row acl count mismatch; keeping parsed entries");
    }
    Some(FileMeta {
        name,
        size,
        word_count,
        created,
        modified,
        last_accessed,
        last_accessed_by,
        owner,
        folder,
        acl,
    })
}

impl MetaStore {
    /// Loads the table from disk; a missing file means an empty store.
    pub fn open(layout: &Layout) -> io::Result<(Self, usize)> {
        let path = layout.metadata_file();
        let mut table = Vec::new();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match parse_line(line) {
                        Some(meta) => table.push(meta),
                        None => warn!(%line, "skipping malformed metadata row"),
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let loaded = table.len();
        Ok((
            Self { path, files_dir: layout.files_dir(), table: Mutex::new(table) },
            loaded,
        ))
    }

    fn save(&self, table: &[FileMeta]) -> io::Result<()> {
        let mut out = String::new();
        for meta in table {
            out.push_str(&render_line(meta));
            out.push('\n');
        }
        std::fs::write(&self.path, out)
    }

    fn stat_file(&self, name: &str) -> (u64, u64) {
        match std::fs::read_to_string(self.files_dir.join(name)) {
            Ok(text) => (text.len() as u64, sentence::word_count(&text)),
            Err(_) => (0, 0),
        }
    }

    pub fn get(&self, name: &str) -> Option<FileMeta> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.iter().find(|m| m.name == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn all(&self) -> Vec<FileMeta> {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Adds a row for `name`, statting the live file for its initial
    /// size and word count. Returns false if the row already exists.
    pub fn add(&self, name: &str) -> io::Result<bool> {
        let (size, words) = self.stat_file(name);
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if table.iter().any(|m| m.name == name) {
            return Ok(false);
        }
        table.push(FileMeta::new(name, size, words));
        self.save(&table)?;
        Ok(true)
    }

    pub fn remove(&self, name: &str) -> io::Result<bool> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let before = table.len();
        table.retain(|m| m.name != name);
        if table.len() == before {
            return Ok(false);
        }
        self.save(&table)?;
        Ok(true)
    }

    fn mutate<F: FnOnce(&mut FileMeta)>(&self, name: &str, f: F) -> io::Result<bool> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        match table.iter_mut().find(|m| m.name == name) {
            Some(meta) => {
                f(meta);
                self.save(&table)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-stats the live file after a write and bumps the modified
    /// stamp.
    pub fn refresh(&self, name: &str) -> io::Result<bool> {
        let (size, words) = self.stat_file(name);
        self.mutate(name, |meta| {
            meta.size = size;
            meta.word_count = words;
            meta.modified = clock::now_secs();
        })
    }

    pub fn touch_access(&self, name: &str, user: &str) -> io::Result<bool> {
        self.mutate(name, |meta| {
            meta.last_accessed = clock::now_secs();
            meta.last_accessed_by = user.to_owned();
        })
    }

    pub fn set_owner(&self, name: &str, owner: &str) -> io::Result<bool> {
        self.mutate(name, |meta| meta.owner = owner.to_owned())
    }

    pub fn set_folder(&self, name: &str, folder: &str) -> io::Result<bool> {
        self.mutate(name, |meta| meta.folder = folder.to_owned())
    }

    /// Adds or updates an ACL entry; an existing entry for the user is
    /// updated in place rather than duplicated.
    pub fn set_acl(&self, name: &str, user: &str, perm: Permission) -> io::Result<bool> {
        self.mutate(name, |meta| {
            if let Some(entry) = meta.acl.iter_mut().find(|e| e.user == user) {
                entry.perm = perm;
            } else if meta.acl.len() < MAX_ACL_ENTRIES {
                meta.acl.push(AclEntry { user: user.to_owned(), perm });
            }
        })
    }

    pub fn remove_acl(&self, name: &str, user: &str) -> io::Result<bool> {
        self.mutate(name, |meta| meta.acl.retain(|e| e.user != user))
    }

    /// Whether `user` owns `name`; `None` when the file is unknown.
    pub fn owner_is(&self, name: &str, user: &str) -> Option<bool> {
        self.get(name).map(|m| m.owner == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_roundtrip_with_acl() {
        let mut meta = FileMeta::new("notes", 42, 7);
        meta.owner = "alice".into();
        meta.folder = "proj/a".into();
        meta.last_accessed_by = "bob".into();
        meta.acl = vec![
            AclEntry { user: "bob".into(), perm: Permission::Read },
            AclEntry { user: "carol".into(), perm: Permission::Write },
        ];
        let parsed = parse_line(&render_line(&meta)).unwrap();
        assert_eq!(parsed.name, "notes");
        assert_eq!(parsed.size, 42);
        assert_eq!(parsed.word_count, 7);
        assert_eq!(parsed.owner, "alice");
        assert_eq!(parsed.folder, "proj/a");
        assert_eq!(parsed.acl, meta.acl);
    }

    #[test]
    fn line_roundtrip_with_unset_fields() {
        let meta = FileMeta::new("bare", 0, 0);
        let line = render_line(&meta);
        assert!(line.contains(",-,-,-,0,"));
        let parsed = parse_line(&line).unwrap();
        assert!(parsed.owner.is_empty());
        assert!(parsed.folder.is_empty());
        assert!(parsed.last_accessed_by.is_empty());
        assert!(parsed.acl.is_empty());
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse_line("short,line").is_none());
        assert!(parse_line("f,notanumber,0,0,0,0,-,-,-,0,").is_none());
    }
}
