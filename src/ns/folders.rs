//! The folder registry: a flat set of folder paths with owners.
//!
//! '/' is a notational separator; no parent-folder existence is
//! enforced. The registry is only ever touched under the catalog lock,
//! together with the trie it is co-consistent with.

#[derive(Debug, Clone)]
pub struct FolderRecord {
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Default)]
pub struct FolderSet {
    records: Vec<FolderRecord>,
}

/// Segment-aligned prefix rewrite: `a` matches `a` and `a/...` but not
/// `ab`. Returns the rewritten path when the prefix matches.
pub fn rewrite_prefix(path: &str, src: &str, dst: &str) -> Option<String> {
    if path == src {
        return Some(dst.to_owned());
    }
    let rest = path.strip_prefix(src)?.strip_prefix('/')?;
    Some(format!("{dst}/{rest}"))
}

impl FolderSet {
    pub fn add(&mut self, name: &str, owner: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.records.push(FolderRecord { name: name.to_owned(), owner: owner.to_owned() });
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    pub fn owner(&self, name: &str) -> Option<&str> {
        self.records.iter().find(|r| r.name == name).map(|r| r.owner.as_str())
    }

    /// Renames `src` to `dst`, carrying nested registry entries along.
    pub fn rename(&mut self, src: &str, dst: &str) {
        for record in &mut self.records {
            if let Some(renamed) = rewrite_prefix(&record.name, src, dst) {
                record.name = renamed;
            }
        }
    }

    /// Folders whose path has no separator: the root-level entries.
    pub fn top_level(&self) -> impl Iterator<Item = &FolderRecord> {
        self.records.iter().filter(|r| !r.name.contains('/'))
    }

    /// Immediate children of `folder`: entries shaped
    /// `folder/<segment>` with no further separator. Yields the child
    /// segment with its record.
    pub fn children_of<'a>(
        &'a self,
        folder: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a FolderRecord)> {
        self.records.iter().filter_map(move |r| {
            let rest = r.name.strip_prefix(folder)?.strip_prefix('/')?;
            (!rest.is_empty() && !rest.contains('/')).then_some((rest, r))
        })
    }
}
