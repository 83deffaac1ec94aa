//! Disk-level tests of the sentence write engine, undo history and
//! checkpoints.

use std::sync::Arc;

use docfs::proto::payload::SsRegistration;
use docfs::ss::layout::Layout;
use docfs::ss::store::MetaStore;
use docfs::ss::{checkpoint, undo, write, StorageServer};

fn server() -> (tempfile::TempDir, Arc<StorageServer>) {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::new(dir.path().join("ss"));
    layout.create_dirs().unwrap();
    let (store, loaded) = MetaStore::open(&layout).unwrap();
    assert_eq!(loaded, 0);
    let public = SsRegistration { ip: "127.0.0.1".into(), port: 7100 };
    (dir, Arc::new(StorageServer::new(layout, store, public)))
}

async fn seed(ss: &StorageServer, name: &str, content: &str) {
    tokio::fs::write(ss.layout.file(name), content).await.unwrap();
    assert!(ss.store.add(name).unwrap());
    ss.store.set_owner(name, "alice").unwrap();
}

async fn content(ss: &StorageServer, name: &str) -> String {
    tokio::fs::read_to_string(ss.layout.file(name)).await.unwrap()
}

#[tokio::test]
async fn concurrent_writers_on_disjoint_sentences() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "Hello world. Goodbye world.").await;

    // writer A holds sentence 1, writer B sentence 2
    write::begin(&ss, "doc", 1, 1).await.unwrap();
    write::begin(&ss, "doc", 2, 2).await.unwrap();

    // a third writer on sentence 1 is rejected with a conflict
    assert!(matches!(
        write::begin(&ss, "doc", 1, 3).await,
        Err(write::WriteError::Conflict)
    ));

    write::insert(&ss, "doc", 1, 1, 3, "cruel").await.unwrap();
    write::insert(&ss, "doc", 2, 2, 1, "Farewell").await.unwrap();

    write::commit(&ss, "doc", 1, 1, "alice").await.unwrap();
    write::commit(&ss, "doc", 2, 2, "bob").await.unwrap();

    assert_eq!(content(&ss, "doc").await, "Hello world cruel. Farewell Goodbye world.");
}

#[tokio::test]
async fn commit_order_does_not_matter() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "Hello world. Goodbye world.").await;

    write::begin(&ss, "doc", 1, 1).await.unwrap();
    write::begin(&ss, "doc", 2, 2).await.unwrap();
    write::insert(&ss, "doc", 1, 1, 3, "cruel").await.unwrap();
    write::insert(&ss, "doc", 2, 2, 1, "Farewell").await.unwrap();

    // B first this time
    write::commit(&ss, "doc", 2, 2, "bob").await.unwrap();
    write::commit(&ss, "doc", 1, 1, "alice").await.unwrap();

    assert_eq!(content(&ss, "doc").await, "Hello world cruel. Farewell Goodbye world.");
}

#[tokio::test]
async fn lock_is_released_by_commit_and_abandon() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "one. two.").await;

    write::begin(&ss, "doc", 1, 1).await.unwrap();
    write::insert(&ss, "doc", 1, 1, 1, "zero").await.unwrap();
    write::commit(&ss, "doc", 1, 1, "alice").await.unwrap();
    // the sentence is free again
    write::begin(&ss, "doc", 1, 2).await.unwrap();
    write::abandon(&ss, "doc", 1, 2).await;
    write::begin(&ss, "doc", 1, 3).await.unwrap();
    write::abandon(&ss, "doc", 1, 3).await;

    // the abandoned writer's edits never landed
    assert_eq!(content(&ss, "doc").await, "zero one. two.");
}

#[tokio::test]
async fn begin_validates_sentence_range() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "one. two.").await;

    assert!(matches!(
        write::begin(&ss, "missing", 1, 1).await,
        Err(write::WriteError::NotFound)
    ));
    // two terminated sentences: 3 is beyond the editable range
    assert!(matches!(
        write::begin(&ss, "doc", 3, 1).await,
        Err(write::WriteError::BadSentence)
    ));
    // an empty file exposes exactly sentence 1
    seed(&ss, "empty", "").await;
    write::begin(&ss, "empty", 1, 4).await.unwrap();
    write::insert(&ss, "empty", 1, 4, 1, "Hello.").await.unwrap();
    write::commit(&ss, "empty", 1, 4, "alice").await.unwrap();
    assert_eq!(content(&ss, "empty").await, "Hello.");
}

#[tokio::test]
async fn undo_restores_and_marks_used() {
    let (_dir, ss) = server();
    seed(&ss, "a", "one. two.").await;

    write::begin(&ss, "a", 1, 1).await.unwrap();
    write::insert(&ss, "a", 1, 1, 2, "big").await.unwrap();
    write::commit(&ss, "a", 1, 1, "alice").await.unwrap();
    assert_eq!(content(&ss, "a").await, "one big. two.");

    undo::perform(&ss.layout, &ss.store, "a").await.unwrap();
    assert_eq!(content(&ss, "a").await, "one. two.");

    // the only entry is used now: no further history
    assert!(matches!(
        undo::perform(&ss.layout, &ss.store, "a").await,
        Err(undo::UndoError::NoHistory)
    ));
}

#[tokio::test]
async fn undo_history_is_monotonic() {
    let (_dir, ss) = server();
    seed(&ss, "a", "start.").await;

    let words = ["first", "second", "third"];
    for (i, word) in words.iter().enumerate() {
        let conn = (i + 1) as u64;
        write::begin(&ss, "a", 1, conn).await.unwrap();
        write::insert(&ss, "a", 1, conn, 1, word).await.unwrap();
        write::commit(&ss, "a", 1, conn, "alice").await.unwrap();
    }
    assert_eq!(content(&ss, "a").await, "third second first start.");

    for _ in 0..words.len() {
        undo::perform(&ss.layout, &ss.store, "a").await.unwrap();
    }
    assert_eq!(content(&ss, "a").await, "start.");
    assert!(matches!(
        undo::perform(&ss.layout, &ss.store, "a").await,
        Err(undo::UndoError::NoHistory)
    ));

    // a later write appends fresh history without resurrecting used
    // entries: exactly one undo is available afterwards
    write::begin(&ss, "a", 1, 9).await.unwrap();
    write::insert(&ss, "a", 1, 9, 1, "again").await.unwrap();
    write::commit(&ss, "a", 1, 9, "alice").await.unwrap();
    assert_eq!(content(&ss, "a").await, "again start.");

    undo::perform(&ss.layout, &ss.store, "a").await.unwrap();
    assert_eq!(content(&ss, "a").await, "start.");
    assert!(matches!(
        undo::perform(&ss.layout, &ss.store, "a").await,
        Err(undo::UndoError::NoHistory)
    ));
}

#[tokio::test]
async fn checkpoint_and_revert_roundtrip() {
    let (_dir, ss) = server();
    seed(&ss, "b", "v1.").await;

    checkpoint::create(&ss, "b", "tagA", "alice").await.unwrap();
    assert!(matches!(
        checkpoint::create(&ss, "b", "tagA", "alice").await,
        Err(checkpoint::CheckpointError::Duplicate)
    ));

    write::begin(&ss, "b", 1, 1).await.unwrap();
    write::insert(&ss, "b", 1, 1, 1, "v2").await.unwrap();
    write::commit(&ss, "b", 1, 1, "alice").await.unwrap();
    assert_eq!(content(&ss, "b").await, "v2 v1.");

    let snapshot = checkpoint::view(&ss, "b", "tagA").await.unwrap();
    assert_eq!(snapshot, b"v1.");

    checkpoint::revert(&ss, "b", "tagA", "alice").await.unwrap();
    assert_eq!(content(&ss, "b").await, "v1.");

    // the revert itself recorded an undo entry: undo returns to the
    // pre-revert content
    undo::perform(&ss.layout, &ss.store, "b").await.unwrap();
    assert_eq!(content(&ss, "b").await, "v2 v1.");

    let tags: Vec<String> = checkpoint::list(&ss, "b")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.tag)
        .collect();
    assert_eq!(tags, vec!["tagA"]);

    assert!(matches!(
        checkpoint::view(&ss, "b", "nope").await,
        Err(checkpoint::CheckpointError::Missing)
    ));
}

#[tokio::test]
async fn checkpoints_of_a_deleted_file_are_unreachable() {
    let (_dir, ss) = server();
    seed(&ss, "gone", "secret content.").await;
    checkpoint::create(&ss, "gone", "tag", "alice").await.unwrap();

    // a delete removes the live file and its metadata row; the
    // checkpoint artifacts left on disk must not be reachable
    tokio::fs::remove_file(ss.layout.file("gone")).await.unwrap();
    assert!(ss.store.remove("gone").unwrap());

    assert!(matches!(
        checkpoint::view(&ss, "gone", "tag").await,
        Err(checkpoint::CheckpointError::NotFound)
    ));
    assert!(matches!(
        checkpoint::list(&ss, "gone").await,
        Err(checkpoint::CheckpointError::NotFound)
    ));
    assert!(matches!(
        checkpoint::revert(&ss, "gone", "tag", "alice").await,
        Err(checkpoint::CheckpointError::NotFound)
    ));
    // revert refused: nothing was written back
    assert!(!ss.layout.file("gone").exists());
}

#[tokio::test]
async fn checkpoints_refuse_locked_files() {
    let (_dir, ss) = server();
    seed(&ss, "c", "one.").await;
    checkpoint::create(&ss, "c", "before", "alice").await.unwrap();

    write::begin(&ss, "c", 1, 1).await.unwrap();
    assert!(matches!(
        checkpoint::create(&ss, "c", "tag", "alice").await,
        Err(checkpoint::CheckpointError::Locked)
    ));
    assert!(matches!(
        checkpoint::revert(&ss, "c", "before", "alice").await,
        Err(checkpoint::CheckpointError::Locked)
    ));
    write::abandon(&ss, "c", 1, 1).await;
    checkpoint::create(&ss, "c", "tag", "alice").await.unwrap();
}

#[tokio::test]
async fn commit_refreshes_metadata() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "one. two.").await;
    let before = ss.store.get("doc").unwrap();
    assert_eq!(before.word_count, 2);

    write::begin(&ss, "doc", 1, 7).await.unwrap();
    write::insert(&ss, "doc", 1, 7, 2, "big bright").await.unwrap();
    write::commit(&ss, "doc", 1, 7, "bob").await.unwrap();

    let after = ss.store.get("doc").unwrap();
    assert_eq!(after.word_count, 4);
    assert_eq!(after.size, content(&ss, "doc").await.len() as u64);
    assert_eq!(after.last_accessed_by, "bob");
}
