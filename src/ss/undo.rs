//! Linear undo history.
//!
//! Every commit appends one entry to the file's undo log and copies the
//! pre-commit bytes into the versions directory. Undo restores the
//! newest entry whose used bit is clear and sets the bit; entries are
//! never deleted, so history stays monotonic and there is no redo.

use std::io;

use tracing::debug;

use crate::clock;
use crate::ss::layout::Layout;
use crate::ss::store::MetaStore;

/// One line of an undo log: `timestamp|backup|user|used`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub ts: i64,
    pub backup: String,
    pub user: String,
    pub used: bool,
}

#[derive(Debug)]
pub enum UndoError {
    /// Every entry is used, or the log does not exist.
    NoHistory,
    Io(io::Error),
}

impl From<io::Error> for UndoError {
    fn from(err: io::Error) -> Self {
        UndoError::Io(err)
    }
}

fn render(entries: &[UndoEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&format!(
            "{}|{}|{}|{}\n",
            e.ts,
            e.backup,
            e.user,
            u8::from(e.used)
        ));
    }
    out
}

fn parse(text: &str) -> Vec<UndoEntry> {
    text.lines()
        .filter_map(|line| {
            let mut f = line.splitn(4, '|');
            Some(UndoEntry {
                ts: f.next()?.parse().ok()?,
                backup: f.next()?.to_owned(),
                user: f.next()?.to_owned(),
                used: f.next()? == "1",
            })
        })
        .collect()
}

async fn read_log(layout: &Layout, file: &str) -> io::Result<Vec<UndoEntry>> {
    match tokio::fs::read_to_string(layout.undo_log(file)).await {
        Ok(text) => Ok(parse(&text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

/// Copies the pre-commit content into the versions directory and
/// appends a fresh (unused) entry to the file's undo log.
pub async fn record_backup(
    layout: &Layout,
    file: &str,
    user: &str,
    content: &[u8],
) -> io::Result<()> {
    let ts = clock::now_nanos();
    let backup = format!("{file}.{ts}.bak");
    tokio::fs::write(layout.version(&backup), content).await?;

    let line = format!("{ts}|{backup}|{user}|0\n");
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.undo_log(file))
        .await?;
    tokio::io::AsyncWriteExt::write_all(&mut log, line.as_bytes()).await?;
    Ok(())
}

/// Restores the newest unused backup into the live file and marks the
/// entry used. The caller must already have checked that no sentence of
/// the file is locked.
pub async fn perform(layout: &Layout, store: &MetaStore, file: &str) -> Result<(), UndoError> {
    let mut entries = read_log(layout, file).await?;

    // Newest first; the log's own order breaks equal-stamp ties.
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse((entries[i].ts, i)));

    let target = order
        .into_iter()
        .find(|&i| !entries[i].used)
        .ok_or(UndoError::NoHistory)?;

    let backup = tokio::fs::read(layout.version(&entries[target].backup)).await?;
    tokio::fs::write(layout.file(file), &backup).await?;
    entries[target].used = true;
    tokio::fs::write(layout.undo_log(file), render(&entries)).await?;
    store.refresh(file)?;
    debug!(%file, backup = %entries[target].backup, "restored undo backup");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_roundtrip() {
        let entries = vec![
            UndoEntry { ts: 10, backup: "a.10.bak".into(), user: "alice".into(), used: false },
            UndoEntry { ts: 20, backup: "a.20.bak".into(), user: "bob".into(), used: true },
        ];
        assert_eq!(parse(&render(&entries)), entries);
    }

    #[test]
    fn parse_skips_garbage() {
        let entries = parse("not|enough\n5|a.bak|u|0\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ts, 5);
    }
}
