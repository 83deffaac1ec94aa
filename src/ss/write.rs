//! The copy-on-write sentence edit engine.
//!
//! A writer's uncommitted edits live in a private swap file keyed by
//! (file, sentence, connection). Inserts rewrite the swap only; the
//! commit re-reads the live file under the file's commit lock and merges
//! the writer's sentence into it, so concurrent commits to other
//! sentences of the same file survive.

use std::io;

use tracing::debug;

use crate::ss::sentence::{self, InsertError};
use crate::ss::{undo, StorageServer};

#[derive(Debug)]
pub enum WriteError {
    /// The file is unknown to this server.
    NotFound,
    /// The sentence is locked by another connection.
    Conflict,
    /// The sentence index is outside the editable range.
    BadSentence,
    /// The word index is outside the sentence.
    BadPosition,
    Io(io::Error),
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::Io(err)
    }
}

impl From<InsertError> for WriteError {
    fn from(err: InsertError) -> Self {
        match err {
            InsertError::BadSentence => WriteError::BadSentence,
            InsertError::BadPosition => WriteError::BadPosition,
        }
    }
}

async fn read_text_or_empty(path: std::path::PathBuf) -> io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err),
    }
}

/// Enters write mode: takes the (file, sentence) lock and validates the
/// sentence is addressable in the current live content.
pub async fn begin(
    ss: &StorageServer,
    file: &str,
    sentence_no: u32,
    conn: u64,
) -> Result<(), WriteError> {
    if !ss.store.contains(file) {
        return Err(WriteError::NotFound);
    }
    if !ss.locks.try_acquire(file, sentence_no, conn) {
        return Err(WriteError::Conflict);
    }
    let live = match read_text_or_empty(ss.layout.file(file)).await {
        Ok(text) => text,
        Err(err) => {
            ss.locks.release(file, sentence_no, conn);
            return Err(err.into());
        }
    };
    if sentence_no as usize > sentence::editable_count(&live) {
        ss.locks.release(file, sentence_no, conn);
        return Err(WriteError::BadSentence);
    }
    debug!(%file, sentence_no, conn, "write mode entered");
    Ok(())
}

/// Applies one `<word_index> <content>` insert to the writer's swap.
pub async fn insert(
    ss: &StorageServer,
    file: &str,
    sentence_no: u32,
    conn: u64,
    word_idx: usize,
    content: &str,
) -> Result<(), WriteError> {
    let swap_path = ss.layout.swap(file, sentence_no, conn);
    let current = if tokio::fs::try_exists(&swap_path).await? {
        tokio::fs::read_to_string(&swap_path).await?
    } else {
        read_text_or_empty(ss.layout.file(file)).await?
    };
    let rewritten = sentence::insert(&current, sentence_no as usize, word_idx, content)?;
    tokio::fs::write(&swap_path, rewritten).await?;
    Ok(())
}

/// Commits the swap: merges the writer's sentence into the current live
/// file, recording an undo backup first. Releases the sentence lock.
pub async fn commit(
    ss: &StorageServer,
    file: &str,
    sentence_no: u32,
    conn: u64,
    user: &str,
) -> Result<(), WriteError> {
    let swap_path = ss.layout.swap(file, sentence_no, conn);
    let result = async {
        let swap = match tokio::fs::read_to_string(&swap_path).await {
            Ok(text) => text,
            // no insert ever happened; nothing to merge
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(WriteError::Io(err)),
        };

        let commit_lock = ss.commit_lock(file);
        let _guard = commit_lock.lock().await;

        let live = read_text_or_empty(ss.layout.file(file)).await?;
        undo::record_backup(&ss.layout, file, user, live.as_bytes()).await?;

        let merged = sentence::merge(&live, &swap, sentence_no as usize);
        tokio::fs::write(ss.layout.file(file), merged).await?;
        ss.store.refresh(file)?;
        ss.store.touch_access(file, user)?;

        let _ = tokio::fs::remove_file(&swap_path).await;
        debug!(%file, sentence_no, conn, "commit merged");
        Ok(())
    }
    .await;

    ss.locks.release(file, sentence_no, conn);
    result
}

/// Abandons an uncommitted write: drops the swap (orphans are tolerated,
/// so removal failures are ignored) and releases the lock.
pub async fn abandon(ss: &StorageServer, file: &str, sentence_no: u32, conn: u64) {
    let _ = tokio::fs::remove_file(ss.layout.swap(file, sentence_no, conn)).await;
    ss.locks.release(file, sentence_no, conn);
}
