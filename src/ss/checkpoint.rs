//! Named checkpoints: full-content snapshots with a per-file meta log.

use std::io;

use tracing::info;

use crate::clock;
use crate::ss::layout::Layout;
use crate::ss::{undo, StorageServer};

/// One line of a checkpoint meta log: `timestamp|tag|user|size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub ts: i64,
    pub tag: String,
    pub user: String,
    pub size: u64,
}

#[derive(Debug)]
pub enum CheckpointError {
    /// The file is unknown to this server.
    NotFound,
    /// A sentence of the file is locked by a writer.
    Locked,
    /// The tag already names a checkpoint of this file.
    Duplicate,
    /// No checkpoint with this tag exists.
    Missing,
    Io(io::Error),
}

impl From<io::Error> for CheckpointError {
    fn from(err: io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

fn parse_meta(text: &str) -> Vec<CheckpointEntry> {
    text.lines()
        .filter_map(|line| {
            let mut f = line.splitn(4, '|');
            Some(CheckpointEntry {
                ts: f.next()?.parse().ok()?,
                tag: f.next()?.to_owned(),
                user: f.next()?.to_owned(),
                size: f.next()?.parse().ok()?,
            })
        })
        .collect()
}

async fn read_meta(layout: &Layout, file: &str) -> io::Result<Vec<CheckpointEntry>> {
    match tokio::fs::read_to_string(layout.checkpoint_meta(file)).await {
        Ok(text) => Ok(parse_meta(&text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

/// Snapshots the live file under `tag`. Fails while any sentence lock is
/// held and on duplicate tags.
pub async fn create(
    ss: &StorageServer,
    file: &str,
    tag: &str,
    user: &str,
) -> Result<(), CheckpointError> {
    if !ss.store.contains(file) {
        return Err(CheckpointError::NotFound);
    }
    if ss.locks.file_locked(file) {
        return Err(CheckpointError::Locked);
    }
    let meta = read_meta(&ss.layout, file).await?;
    if meta.iter().any(|e| e.tag == tag) {
        return Err(CheckpointError::Duplicate);
    }

    let content = match tokio::fs::read(ss.layout.file(file)).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    tokio::fs::write(ss.layout.checkpoint(file, tag), &content).await?;

    let line = format!("{}|{}|{}|{}\n", clock::now_secs(), tag, user, content.len());
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(ss.layout.checkpoint_meta(file))
        .await?;
    tokio::io::AsyncWriteExt::write_all(&mut log, line.as_bytes()).await?;
    info!(%file, %tag, %user, "checkpoint created");
    Ok(())
}

/// Returns the snapshot bytes for `tag`. Snapshots of files this
/// server no longer tracks are unreachable, even though their
/// artifacts may still sit on disk.
pub async fn view(ss: &StorageServer, file: &str, tag: &str) -> Result<Vec<u8>, CheckpointError> {
    if !ss.store.contains(file) {
        return Err(CheckpointError::NotFound);
    }
    read_snapshot(&ss.layout, file, tag).await
}

async fn read_snapshot(
    layout: &Layout,
    file: &str,
    tag: &str,
) -> Result<Vec<u8>, CheckpointError> {
    match tokio::fs::read(layout.checkpoint(file, tag)).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(CheckpointError::Missing),
        Err(err) => Err(err.into()),
    }
}

/// All checkpoint entries recorded for `file`.
pub async fn list(ss: &StorageServer, file: &str) -> Result<Vec<CheckpointEntry>, CheckpointError> {
    if !ss.store.contains(file) {
        return Err(CheckpointError::NotFound);
    }
    Ok(read_meta(&ss.layout, file).await?)
}

/// Writes the checkpoint bytes back into the live file. A write
/// equivalent: it first records a fresh undo backup, so an undo after a
/// revert returns to the pre-revert content.
pub async fn revert(
    ss: &StorageServer,
    file: &str,
    tag: &str,
    user: &str,
) -> Result<(), CheckpointError> {
    if !ss.store.contains(file) {
        return Err(CheckpointError::NotFound);
    }
    if ss.locks.file_locked(file) {
        return Err(CheckpointError::Locked);
    }
    let snapshot = read_snapshot(&ss.layout, file, tag).await?;

    let live = match tokio::fs::read(ss.layout.file(file)).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    undo::record_backup(&ss.layout, file, user, &live).await?;

    tokio::fs::write(ss.layout.file(file), &snapshot).await?;
    ss.store.refresh(file)?;
    info!(%file, %tag, %user, "reverted to checkpoint");
    Ok(())
}

/// Renders the checkpoint list body sent to clients.
pub fn render_list(entries: &[CheckpointEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&format!(
            "{} {} ({} bytes, by {})\n",
            clock::fmt_minute(e.ts),
            e.tag,
            e.size,
            e.user
        ));
    }
    out
}
