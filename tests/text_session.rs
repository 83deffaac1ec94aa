//! End-to-end tests of the textual storage-server protocol, driven
//! over in-process duplex pipes.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use docfs::proto::payload::SsRegistration;
use docfs::ss::layout::Layout;
use docfs::ss::store::MetaStore;
use docfs::ss::{text, StorageServer};

struct Session {
    reader: BufReader<ReadHalf<tokio::io::DuplexStream>>,
    writer: WriteHalf<tokio::io::DuplexStream>,
}

impl Session {
    async fn open(ss: &Arc<StorageServer>, user: &str) -> Session {
        let (local, remote) = tokio::io::duplex(1 << 16);
        let conn = ss.next_conn_id();
        let ss = Arc::clone(ss);
        tokio::spawn(async move {
            text::handle(ss, remote, conn).await;
        });
        let (read_half, writer) = tokio::io::split(local);
        let mut session = Session { reader: BufReader::new(read_half), writer };
        session.send(&format!("USER {user}\n")).await;
        assert_eq!(session.line().await, "OK_200 USER_ACCEPTED");
        session
    }

    async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end_matches('\n').to_owned()
    }

    /// Reads body lines until `terminator`, returning the body.
    async fn body_until(&mut self, terminator: &str) -> String {
        let mut body = String::new();
        loop {
            let line = self.line().await;
            if line == terminator {
                return body;
            }
            body.push_str(&line);
            body.push('\n');
        }
    }
}

fn server() -> (tempfile::TempDir, Arc<StorageServer>) {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::new(dir.path().join("ss"));
    layout.create_dirs().unwrap();
    let (store, _) = MetaStore::open(&layout).unwrap();
    let public = SsRegistration { ip: "127.0.0.1".into(), port: 7200 };
    (dir, Arc::new(StorageServer::new(layout, store, public)))
}

async fn seed(ss: &StorageServer, name: &str, content: &str, owner: &str) {
    tokio::fs::write(ss.layout.file(name), content).await.unwrap();
    assert!(ss.store.add(name).unwrap());
    ss.store.set_owner(name, owner).unwrap();
}

#[tokio::test]
async fn handshake_is_mandatory() {
    let (_dir, ss) = server();
    let (local, remote) = tokio::io::duplex(4096);
    let conn = ss.next_conn_id();
    let handler = {
        let ss = Arc::clone(&ss);
        tokio::spawn(async move { text::handle(ss, remote, conn).await })
    };

    let (read_half, mut writer) = tokio::io::split(local);
    writer.write_all(b"READ doc\n").await.unwrap();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, "ERR_400 EXPECTED_USER\n");
    handler.await.unwrap();
}

#[tokio::test]
async fn read_framing() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "Hello world.", "alice").await;
    seed(&ss, "empty", "", "alice").await;

    let mut session = Session::open(&ss, "alice").await;

    session.send("READ doc\n").await;
    assert_eq!(session.line().await, "OK_200 FILE_CONTENT");
    let body = session.body_until("END_OF_FILE").await;
    assert_eq!(body, "Hello world.\n");

    session.send("READ empty\n").await;
    assert_eq!(session.line().await, "OK_200 EMPTY_FILE");

    session.send("READ missing\n").await;
    assert_eq!(session.line().await, "ERR_404 FILE_NOT_FOUND");

    // the read touched the access stats
    let meta = ss.store.get("doc").unwrap();
    assert_eq!(meta.last_accessed_by, "alice");
}

#[tokio::test]
async fn stream_sends_words_then_completes() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "alpha beta. gamma", "alice").await;

    let mut session = Session::open(&ss, "alice").await;
    session.send("STREAM doc\n").await;
    let mut streamed = String::new();
    loop {
        let mut byte = [0u8; 1];
        session.reader.read_exact(&mut byte).await.unwrap();
        streamed.push(byte[0] as char);
        if streamed.ends_with("STREAM_COMPLETE\n") {
            break;
        }
    }
    assert_eq!(streamed, "alpha beta. gamma STREAM_COMPLETE\n");
}

#[tokio::test]
async fn write_mode_full_exchange() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "Hello world. Goodbye world.", "alice").await;

    let mut a = Session::open(&ss, "alice").await;
    let mut b = Session::open(&ss, "bob").await;

    a.send("WRITE doc 1\n").await;
    assert_eq!(a.line().await, "OK_200 WRITE MODE");

    // bob cannot take alice's sentence, but sentence 2 is free
    b.send("WRITE doc 1\n").await;
    assert_eq!(b.line().await, "ERR_409 SENTENCE_LOCKED");
    b.send("WRITE doc 2\n").await;
    assert_eq!(b.line().await, "OK_200 WRITE MODE");

    a.send("3 cruel\n").await;
    assert_eq!(a.line().await, "OK_200 CONTENT INSERTED");
    b.send("1 Farewell\n").await;
    assert_eq!(b.line().await, "OK_200 CONTENT INSERTED");

    a.send("ETIRW\n").await;
    assert_eq!(a.line().await, "OK_200 WRITE COMPLETED");
    b.send("ETIRW\n").await;
    assert_eq!(b.line().await, "OK_200 WRITE COMPLETED");

    let content = tokio::fs::read_to_string(ss.layout.file("doc")).await.unwrap();
    assert_eq!(content, "Hello world cruel. Farewell Goodbye world.");
}

#[tokio::test]
async fn write_mode_rejects_bad_input() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "one two.", "alice").await;

    let mut session = Session::open(&ss, "alice").await;
    session.send("WRITE doc 0\n").await;
    assert_eq!(session.line().await, "ERR_400 INVALID_SENTENCE");
    session.send("WRITE doc 5\n").await;
    assert_eq!(session.line().await, "ERR_400 INVALID_SENTENCE");

    session.send("WRITE doc 1\n").await;
    assert_eq!(session.line().await, "OK_200 WRITE MODE");
    session.send("nonsense line\n").await;
    assert_eq!(session.line().await, "ERR_400 INVALID_POSITION");
    session.send("9 word\n").await;
    assert_eq!(session.line().await, "ERR_400 INVALID_POSITION");
    session.send("ETIRW\n").await;
    assert_eq!(session.line().await, "OK_200 WRITE COMPLETED");
}

#[tokio::test]
async fn disconnect_in_write_mode_releases_the_lock() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "one two.", "alice").await;

    {
        let mut session = Session::open(&ss, "alice").await;
        session.send("WRITE doc 1\n").await;
        assert_eq!(session.line().await, "OK_200 WRITE MODE");
        session.send("1 unfinished\n").await;
        assert_eq!(session.line().await, "OK_200 CONTENT INSERTED");
        // dropped without ETIRW
    }

    // wait for the handler to observe the hangup and clean up
    for _ in 0..200 {
        if !ss.locks.file_locked("doc") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(!ss.locks.file_locked("doc"));

    // the abandoned edit never reached the live file
    let content = tokio::fs::read_to_string(ss.layout.file("doc")).await.unwrap();
    assert_eq!(content, "one two.");
}

#[tokio::test]
async fn checkpoint_command_set() {
    let (_dir, ss) = server();
    seed(&ss, "b", "v1.", "alice").await;

    let mut session = Session::open(&ss, "alice").await;

    session.send("CHECKPOINT b tagA\n").await;
    assert_eq!(session.line().await, "OK_200 CHECKPOINT_CREATED");
    session.send("CHECKPOINT b tagA\n").await;
    assert_eq!(session.line().await, "ERR_409 TAG_EXISTS");

    session.send("WRITE b 1\n").await;
    assert_eq!(session.line().await, "OK_200 WRITE MODE");
    session.send("1 v2\n").await;
    assert_eq!(session.line().await, "OK_200 CONTENT INSERTED");
    session.send("ETIRW\n").await;
    assert_eq!(session.line().await, "OK_200 WRITE COMPLETED");

    session.send("VIEWCHECKPOINT b tagA\n").await;
    assert_eq!(session.line().await, "OK_200 CHECKPOINT_CONTENT");
    assert_eq!(session.body_until("END_OF_CHECKPOINT").await, "v1.\n");

    session.send("VIEWCHECKPOINT b missing\n").await;
    assert_eq!(session.line().await, "ERR_404 CHECKPOINT_NOT_FOUND");

    session.send("REVERT b tagA\n").await;
    assert_eq!(session.line().await, "OK_200 REVERTED");
    let content = tokio::fs::read_to_string(ss.layout.file("b")).await.unwrap();
    assert_eq!(content, "v1.");

    session.send("LISTCHECKPOINTS b\n").await;
    assert_eq!(session.line().await, "OK_200 CHECKPOINT_LIST");
    let listing = session.body_until("END_OF_LIST").await;
    assert!(listing.contains("tagA"));

    // once the file is deleted its leftover snapshots are unreachable
    tokio::fs::remove_file(ss.layout.file("b")).await.unwrap();
    assert!(ss.store.remove("b").unwrap());
    session.send("VIEWCHECKPOINT b tagA\n").await;
    assert_eq!(session.line().await, "ERR_404 FILE_NOT_FOUND");
    session.send("LISTCHECKPOINTS b\n").await;
    assert_eq!(session.line().await, "ERR_404 FILE_NOT_FOUND");
    session.send("REVERT b tagA\n").await;
    assert_eq!(session.line().await, "ERR_404 FILE_NOT_FOUND");
}

#[tokio::test]
async fn access_request_workflow() {
    let (_dir, ss) = server();
    seed(&ss, "doc", "text.", "alice").await;

    let mut bob = Session::open(&ss, "bob").await;
    bob.send("REQUESTACCESS doc -W\n").await;
    assert_eq!(bob.line().await, "OK_200 REQUEST_SUBMITTED");
    // a second identical pending request is refused
    bob.send("REQUESTACCESS doc -W\n").await;
    assert_eq!(bob.line().await, "ERR_409 REQUEST_ALREADY_PENDING");
    bob.send("REQUESTACCESS missing -W\n").await;
    assert_eq!(bob.line().await, "ERR_404 FILE_NOT_FOUND");
    // only the owner sees the queue
    bob.send("VIEWREQUESTS doc\n").await;
    assert_eq!(bob.line().await, "ERR_400 NOT_OWNER");

    let mut alice = Session::open(&ss, "alice").await;
    alice.send("VIEWREQUESTS doc\n").await;
    assert_eq!(alice.line().await, "OK_200 ACCESS_REQUESTS");
    let listing = alice.body_until("END_OF_REQUESTS").await;
    assert!(listing.contains("bob"));
    assert!(listing.contains("PENDING"));

    alice.send("APPROVEREQUEST doc bob -W\n").await;
    assert_eq!(alice.line().await, "OK_200 REQUEST_APPROVED");
    // approval persisted an ACL entry
    let meta = ss.store.get("doc").unwrap();
    assert!(meta
        .acl
        .iter()
        .any(|e| e.user == "bob" && e.perm == docfs::proto::Permission::Write));

    // nothing pending anymore
    alice.send("APPROVEREQUEST doc bob -W\n").await;
    assert_eq!(alice.line().await, "ERR_404 NO_PENDING_REQUEST");

    bob.send("REQUESTACCESS doc -R\n").await;
    assert_eq!(bob.line().await, "OK_200 REQUEST_SUBMITTED");
    alice.send("DENYREQUEST doc bob\n").await;
    assert_eq!(alice.line().await, "OK_200 REQUEST_DENIED");
}

#[tokio::test]
async fn unknown_commands_are_rejected() {
    let (_dir, ss) = server();
    let mut session = Session::open(&ss, "alice").await;
    session.send("FROBNICATE doc\n").await;
    assert_eq!(session.line().await, "ERR_400 UNKNOWN_COMMAND");
    // path-escaping names never reach the filesystem
    session.send("READ ../etc/passwd\n").await;
    assert_eq!(session.line().await, "ERR_400 UNKNOWN_COMMAND");
}
