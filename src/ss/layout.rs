//! On-disk layout of a storage server's base directory.

use std::io;
use std::path::{Path, PathBuf};

/// Path helpers for the storage directories. Created once at startup;
/// cheap to clone paths from.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Creates the directory tree if missing.
    pub fn create_dirs(&self) -> io::Result<()> {
        for dir in [
            self.files_dir(),
            self.metadata_dir(),
            self.versions_dir(),
            self.undo_dir(),
            self.checkpoints_dir(),
            self.checkpoint_meta_dir(),
            self.requests_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn files_dir(&self) -> PathBuf {
        self.base.join("files")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.base.join("metadata")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.base.join("versions")
    }

    pub fn undo_dir(&self) -> PathBuf {
        self.base.join("undo")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.base.join("checkpoints")
    }

    pub fn checkpoint_meta_dir(&self) -> PathBuf {
        self.base.join("checkpoint_meta")
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.base.join("access_requests")
    }

    /// The live bytes of `name`.
    pub fn file(&self, name: &str) -> PathBuf {
        self.files_dir().join(name)
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.metadata_dir().join("metadata.txt")
    }

    /// A writer's private scratch copy for one (file, sentence, conn).
    pub fn swap(&self, name: &str, sentence: u32, conn: u64) -> PathBuf {
        self.files_dir().join(format!(".{name}.{sentence}.{conn}.swap"))
    }

    /// An undo backup under its timestamped name.
    pub fn version(&self, backup: &str) -> PathBuf {
        self.versions_dir().join(backup)
    }

    pub fn undo_log(&self, name: &str) -> PathBuf {
        self.undo_dir().join(format!("{name}.undo"))
    }

    pub fn checkpoint(&self, name: &str, tag: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("{name}_{tag}.checkpoint"))
    }

    pub fn checkpoint_meta(&self, name: &str) -> PathBuf {
        self.checkpoint_meta_dir().join(format!("{name}.meta"))
    }

    pub fn requests_log(&self, name: &str) -> PathBuf {
        self.requests_dir().join(format!("{name}.requests"))
    }
}
