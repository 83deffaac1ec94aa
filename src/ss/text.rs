//! The line-oriented protocol spoken on direct client connections.
//!
//! The first line must be `USER <name>`; afterwards one command per
//! line. Responses start with a status token (`OK_200`, `ERR_400`,
//! `ERR_404`, `ERR_409`, `ERR_500`) and multi-line bodies end with a
//! dedicated terminator (`END_OF_FILE`, `STREAM_COMPLETE`, ...).

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::proto::{valid_name, Permission};
use crate::ss::write::WriteError;
use crate::ss::{checkpoint, requests, write, StorageServer};

async fn send<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}

fn parse_perm_flag(token: &str) -> Option<Permission> {
    match token {
        "-R" => Some(Permission::Read),
        "-W" => Some(Permission::Write),
        _ => None,
    }
}

/// Services one client connection until EXIT, EOF or an I/O failure.
/// All sentence locks held by the connection are released on the way
/// out, however it ends.
pub async fn handle<S>(ss: Arc<StorageServer>, stream: S, conn: u64)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut out) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    let user = match lines.next_line().await {
        Ok(Some(line)) => {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some("USER"), Some(name)) if valid_name(name) => name.to_owned(),
                _ => {
                    let _ = send(&mut out, "ERR_400 EXPECTED_USER\n").await;
                    return;
                }
            }
        }
        _ => return,
    };
    if send(&mut out, "OK_200 USER_ACCEPTED\n").await.is_err() {
        return;
    }
    debug!(conn, %user, "client session opened");

    let result = session(&ss, &mut lines, &mut out, &user, conn).await;
    if let Err(err) = result {
        warn!(conn, %user, %err, "client session ended on i/o error");
    }
    ss.locks.release_conn(conn);
    debug!(conn, %user, "client session closed");
}

async fn session<R, W>(
    ss: &StorageServer,
    lines: &mut tokio::io::Lines<BufReader<R>>,
    out: &mut W,
    user: &str,
    conn: u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        let mut tokens = line.split_whitespace();
        let Some(verb) = tokens.next() else { continue };
        let args: Vec<&str> = tokens.collect();

        match (verb, args.as_slice()) {
            ("EXIT", _) => break,

            ("READ", [file]) if valid_name(file) => {
                match ss.store.get(file) {
                    None => send(out, "ERR_404 FILE_NOT_FOUND\n").await?,
                    Some(_) => {
                        let content = read_live(ss, file).await?;
                        if content.is_empty() {
                            send(out, "OK_200 EMPTY_FILE\n").await?;
                        } else {
                            send(out, "OK_200 FILE_CONTENT\n").await?;
                            out.write_all(content.as_bytes()).await?;
                            send(out, "\nEND_OF_FILE\n").await?;
                        }
                        let _ = ss.store.touch_access(file, user);
                    }
                }
            }

            ("STREAM", [file]) if valid_name(file) => {
                match ss.store.get(file) {
                    None => send(out, "ERR_404 FILE_NOT_FOUND\n").await?,
                    Some(_) => {
                        let content = read_live(ss, file).await?;
                        if content.is_empty() {
                            send(out, "OK_200 EMPTY_FILE\n").await?;
                        } else {
                            for word in content.split_whitespace() {
                                out.write_all(word.as_bytes()).await?;
                                out.write_all(b" ").await?;
                                out.flush().await?;
                            }
                            send(out, "STREAM_COMPLETE\n").await?;
                        }
                        let _ = ss.store.touch_access(file, user);
                    }
                }
            }

            ("WRITE", [file, sentence]) if valid_name(file) => {
                let Ok(sentence_no) = sentence.parse::<u32>() else {
                    send(out, "ERR_400 INVALID_SENTENCE\n").await?;
                    continue;
                };
                if sentence_no == 0 {
                    send(out, "ERR_400 INVALID_SENTENCE\n").await?;
                    continue;
                }
                match write::begin(ss, file, sentence_no, conn).await {
                    Ok(()) => {
                        send(out, "OK_200 WRITE MODE\n").await?;
                        write_mode(ss, lines, out, file, sentence_no, conn, user).await?;
                    }
                    Err(err) => send(out, write_error_line(&err)).await?,
                }
            }

            ("CHECKPOINT", [file, tag]) if valid_name(file) && valid_name(tag) => {
                let reply = match checkpoint::create(ss, file, tag, user).await {
                    Ok(()) => "OK_200 CHECKPOINT_CREATED\n",
                    Err(checkpoint::CheckpointError::NotFound) => "ERR_404 FILE_NOT_FOUND\n",
                    Err(checkpoint::CheckpointError::Locked) => "ERR_409 FILE_LOCKED\n",
                    Err(checkpoint::CheckpointError::Duplicate) => "ERR_409 TAG_EXISTS\n",
                    Err(_) => "ERR_500 INTERNAL_ERROR\n",
                };
                send(out, reply).await?;
            }

            ("VIEWCHECKPOINT", [file, tag]) if valid_name(file) && valid_name(tag) => {
                match checkpoint::view(ss, file, tag).await {
                    Ok(bytes) if bytes.is_empty() => {
                        send(out, "OK_200 EMPTY_CHECKPOINT\n").await?
                    }
                    Ok(bytes) => {
                        send(out, "OK_200 CHECKPOINT_CONTENT\n").await?;
                        out.write_all(&bytes).await?;
                        send(out, "\nEND_OF_CHECKPOINT\n").await?;
                    }
                    Err(checkpoint::CheckpointError::NotFound) => {
                        send(out, "ERR_404 FILE_NOT_FOUND\n").await?
                    }
                    Err(checkpoint::CheckpointError::Missing) => {
                        send(out, "ERR_404 CHECKPOINT_NOT_FOUND\n").await?
                    }
                    Err(_) => send(out, "ERR_500 INTERNAL_ERROR\n").await?,
                }
            }

            ("REVERT", [file, tag]) if valid_name(file) && valid_name(tag) => {
                let reply = match checkpoint::revert(ss, file, tag, user).await {
                    Ok(()) => "OK_200 REVERTED\n",
                    Err(checkpoint::CheckpointError::Missing) => "ERR_404 CHECKPOINT_NOT_FOUND\n",
                    Err(checkpoint::CheckpointError::Locked) => "ERR_409 FILE_LOCKED\n",
                    Err(checkpoint::CheckpointError::NotFound) => "ERR_404 FILE_NOT_FOUND\n",
                    Err(_) => "ERR_500 INTERNAL_ERROR\n",
                };
                send(out, reply).await?;
            }

            ("LISTCHECKPOINTS", [file]) if valid_name(file) => {
                match checkpoint::list(ss, file).await {
                    Ok(entries) => {
                        send(out, "OK_200 CHECKPOINT_LIST\n").await?;
                        out.write_all(checkpoint::render_list(&entries).as_bytes()).await?;
                        send(out, "END_OF_LIST\n").await?;
                    }
                    Err(checkpoint::CheckpointError::NotFound) => {
                        send(out, "ERR_404 FILE_NOT_FOUND\n").await?
                    }
                    Err(_) => send(out, "ERR_500 INTERNAL_ERROR\n").await?,
                }
            }

            ("REQUESTACCESS", [file, flag]) if valid_name(file) => {
                let Some(perm) = parse_perm_flag(flag) else {
                    send(out, "ERR_400 INVALID_PERMISSION\n").await?;
                    continue;
                };
                if !ss.store.contains(file) {
                    send(out, "ERR_404 FILE_NOT_FOUND\n").await?;
                    continue;
                }
                let reply = match requests::submit(&ss.layout, file, user, perm).await {
                    Ok(()) => "OK_200 REQUEST_SUBMITTED\n",
                    Err(requests::RequestError::Duplicate) => "ERR_409 REQUEST_ALREADY_PENDING\n",
                    Err(_) => "ERR_500 INTERNAL_ERROR\n",
                };
                send(out, reply).await?;
            }

            ("VIEWREQUESTS", [file]) if valid_name(file) => {
                match ss.store.owner_is(file, user) {
                    None => send(out, "ERR_404 FILE_NOT_FOUND\n").await?,
                    Some(false) => send(out, "ERR_400 NOT_OWNER\n").await?,
                    Some(true) => match requests::list(&ss.layout, file).await {
                        Ok(list) => {
                            send(out, "OK_200 ACCESS_REQUESTS\n").await?;
                            out.write_all(requests::render_list(&list).as_bytes()).await?;
                            send(out, "END_OF_REQUESTS\n").await?;
                        }
                        Err(_) => send(out, "ERR_500 INTERNAL_ERROR\n").await?,
                    },
                }
            }

            ("APPROVEREQUEST", [file, target, flag]) if valid_name(file) => {
                let Some(perm) = parse_perm_flag(flag) else {
                    send(out, "ERR_400 INVALID_PERMISSION\n").await?;
                    continue;
                };
                let reply = match ss.store.owner_is(file, user) {
                    None => "ERR_404 FILE_NOT_FOUND\n",
                    Some(false) => "ERR_400 NOT_OWNER\n",
                    Some(true) => match requests::approve(ss, file, target, perm).await {
                        Ok(()) => "OK_200 REQUEST_APPROVED\n",
                        Err(requests::RequestError::NoPending) => "ERR_404 NO_PENDING_REQUEST\n",
                        Err(_) => "ERR_500 INTERNAL_ERROR\n",
                    },
                };
                send(out, reply).await?;
            }

            ("DENYREQUEST", [file, target]) if valid_name(file) => {
                let reply = match ss.store.owner_is(file, user) {
                    None => "ERR_404 FILE_NOT_FOUND\n",
                    Some(false) => "ERR_400 NOT_OWNER\n",
                    Some(true) => match requests::deny(ss, file, target).await {
                        Ok(()) => "OK_200 REQUEST_DENIED\n",
                        Err(requests::RequestError::NoPending) => "ERR_404 NO_PENDING_REQUEST\n",
                        Err(_) => "ERR_500 INTERNAL_ERROR\n",
                    },
                };
                send(out, reply).await?;
            }

            _ => send(out, "ERR_400 UNKNOWN_COMMAND\n").await?,
        }
    }
    Ok(())
}

fn write_error_line(err: &WriteError) -> &'static str {
    match err {
        WriteError::NotFound => "ERR_404 FILE_NOT_FOUND\n",
        WriteError::Conflict => "ERR_409 SENTENCE_LOCKED\n",
        WriteError::BadSentence => "ERR_400 INVALID_SENTENCE\n",
        WriteError::BadPosition => "ERR_400 INVALID_POSITION\n",
        WriteError::Io(_) => "ERR_500 INTERNAL_ERROR\n",
    }
}

/// The in-WRITE-mode loop: `<word_index> <content>` lines until `ETIRW`.
async fn write_mode<R, W>(
    ss: &StorageServer,
    lines: &mut tokio::io::Lines<BufReader<R>>,
    out: &mut W,
    file: &str,
    sentence_no: u32,
    conn: u64,
    user: &str,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(line) = lines.next_line().await? else {
            // disconnect without commit abandons the swap
            write::abandon(ss, file, sentence_no, conn).await;
            return Ok(());
        };
        let trimmed = line.trim();
        if trimmed == "ETIRW" {
            let reply = match write::commit(ss, file, sentence_no, conn, user).await {
                Ok(()) => {
                    info!(%file, sentence_no, %user, "write committed");
                    "OK_200 WRITE COMPLETED\n"
                }
                Err(err) => write_error_line(&err),
            };
            send(out, reply).await?;
            return Ok(());
        }
        if trimmed == "EXIT" {
            write::abandon(ss, file, sentence_no, conn).await;
            return Ok(());
        }

        let reply = match trimmed.split_once(char::is_whitespace) {
            Some((idx, content)) if !content.trim().is_empty() => {
                match idx.parse::<usize>() {
                    Ok(word_idx) => {
                        match write::insert(ss, file, sentence_no, conn, word_idx, content).await
                        {
                            Ok(()) => "OK_200 CONTENT INSERTED\n",
                            Err(err) => write_error_line(&err),
                        }
                    }
                    Err(_) => "ERR_400 INVALID_POSITION\n",
                }
            }
            _ => "ERR_400 INVALID_POSITION\n",
        };
        send(out, reply).await?;
    }
}

async fn read_live(ss: &StorageServer, file: &str) -> io::Result<String> {
    match tokio::fs::read_to_string(ss.layout.file(file)).await {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err),
    }
}
