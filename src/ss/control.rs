//! The storage server's session with the name server.
//!
//! One long-lived connection: the server registers, streams its file
//! manifest, then answers internal requests (reads, metadata fetches,
//! ACL and ownership updates, forwarded create/delete/undo) until the
//! connection drops.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::proto::payload::{AccessGrant, FileSync, MetadataPatch, SsRegistration};
use crate::proto::{self, header, payload, Component, Header, MsgType};
use crate::ss::store::FileMeta;
use crate::ss::{undo, StorageServer};

fn out_header(msg_type: MsgType, name: &str) -> Header {
    Header::with_name(msg_type, Component::StorageServer, Component::NameServer, name)
}

fn error_header(reason: &str) -> Header {
    Header::error(Component::StorageServer, Component::NameServer, reason)
}

fn sync_record(meta: &FileMeta) -> FileSync {
    FileSync {
        filename: meta.name.clone(),
        owner: meta.owner.clone(),
        acl: meta.acl.clone(),
        word_count: meta.word_count,
        char_count: meta.size,
        created: meta.created,
        modified: meta.modified,
        last_accessed: meta.last_accessed,
        last_accessed_by: meta.last_accessed_by.clone(),
        folder: meta.folder.clone(),
    }
}

/// Registers with the name server and then serves its requests until
/// the session ends.
pub async fn register_and_serve<S>(ss: Arc<StorageServer>, mut stream: S) -> proto::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    register(&ss, &mut stream).await?;
    serve(&ss, &mut stream).await
}

/// Sends the registration payload, awaits the ACK, then streams one
/// `register_file` per metadata row followed by `register_complete`.
pub async fn register<S>(ss: &StorageServer, stream: &mut S) -> proto::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reg = SsRegistration { ip: ss.public.ip.clone(), port: ss.public.port };
    header::write_message(stream, out_header(MsgType::Register, ""), &reg.encode()?).await?;

    let (ack, _) = header::read_message(stream).await?;
    if ack.msg_type != MsgType::Ack {
        return Err(proto::Error::UnexpectedMessage(ack.msg_type));
    }

    let manifest = ss.store.all();
    let count = manifest.len();
    for meta in manifest {
        let record = sync_record(&meta);
        header::write_message(
            stream,
            out_header(MsgType::RegisterFile, &meta.name),
            &record.encode()?,
        )
        .await?;
    }
    header::write_message(stream, out_header(MsgType::RegisterComplete, ""), &[]).await?;
    info!(files = count, "registered with name server");
    Ok(())
}

/// The request loop on the parked session socket.
pub async fn serve<S>(ss: &StorageServer, stream: &mut S) -> proto::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let (request, body) = header::read_message(stream).await?;
        let file = request.name.clone();
        debug!(msg = ?request.msg_type, %file, "name server request");

        match request.msg_type {
            MsgType::Create => {
                let reply = create_file(ss, &file).await;
                header::write_message(stream, reply, &[]).await?;
            }

            MsgType::Delete => {
                let _ = tokio::fs::remove_file(ss.layout.file(&file)).await;
                match ss.store.remove(&file) {
                    Ok(removed) => {
                        if !removed {
                            warn!(%file, "delete for a file with no metadata row");
                        }
                        header::write_message(stream, out_header(MsgType::Ack, &file), &[])
                            .await?;
                    }
                    Err(err) => {
                        warn!(%file, %err, "metadata rewrite failed on delete");
                        header::write_message(stream, error_header("Internal error"), &[])
                            .await?;
                    }
                }
            }

            MsgType::Undo => {
                let reply = if ss.locks.file_locked(&file) {
                    error_header("File is being edited")
                } else {
                    match undo::perform(&ss.layout, &ss.store, &file).await {
                        Ok(()) => out_header(MsgType::Ack, &file),
                        Err(undo::UndoError::NoHistory) => {
                            error_header("No undo history available")
                        }
                        Err(undo::UndoError::Io(err)) => {
                            warn!(%file, %err, "undo failed");
                            error_header("Internal error")
                        }
                    }
                };
                header::write_message(stream, reply, &[]).await?;
            }

            MsgType::InternalRead => match tokio::fs::read(ss.layout.file(&file)).await {
                Ok(bytes) => {
                    header::write_message(stream, out_header(MsgType::InternalData, &file), &bytes)
                        .await?;
                }
                Err(err) => {
                    warn!(%file, %err, "internal read failed");
                    header::write_message(stream, error_header("File not found"), &[]).await?;
                }
            },

            MsgType::InternalGetMetadata => match ss.store.get(&file) {
                Some(meta) => {
                    let patch = MetadataPatch {
                        word_count: meta.word_count,
                        char_count: meta.size,
                        created: meta.created,
                        modified: meta.modified,
                        last_accessed: meta.last_accessed,
                        last_accessed_by: meta.last_accessed_by,
                    };
                    header::write_message(
                        stream,
                        out_header(MsgType::InternalMetadataResp, &file),
                        &patch.encode()?,
                    )
                    .await?;
                }
                None => {
                    header::write_message(stream, error_header("File not found"), &[]).await?;
                }
            },

            MsgType::InternalAddAccess => {
                let grant = AccessGrant::decode(&body)?;
                let reply = match ss.store.set_acl(&file, &grant.user, grant.perm) {
                    Ok(true) => out_header(MsgType::Ack, &file),
                    Ok(false) => error_header("File not found"),
                    Err(_) => error_header("Internal error"),
                };
                header::write_message(stream, reply, &[]).await?;
            }

            MsgType::InternalRemAccess => {
                let user = payload::decode_string(&body)?;
                let reply = match ss.store.remove_acl(&file, &user) {
                    Ok(true) => out_header(MsgType::Ack, &file),
                    Ok(false) => error_header("File not found"),
                    Err(_) => error_header("Internal error"),
                };
                header::write_message(stream, reply, &[]).await?;
            }

            // fire-and-forget: the name server does not await a reply
            MsgType::InternalSetOwner => {
                let owner = payload::decode_string(&body)?;
                if let Err(err) = ss.store.set_owner(&file, &owner) {
                    warn!(%file, %err, "set owner failed");
                }
            }

            MsgType::InternalSetFolder => {
                let folder = payload::decode_string(&body)?;
                let reply = match ss.store.set_folder(&file, &folder) {
                    Ok(true) => out_header(MsgType::Ack, &file),
                    Ok(false) => error_header("File not found"),
                    Err(_) => error_header("Internal error"),
                };
                header::write_message(stream, reply, &[]).await?;
            }

            other => {
                warn!(?other, "unexpected message on control session");
                header::write_message(stream, error_header("Unexpected message"), &[]).await?;
            }
        }
    }
}

async fn create_file(ss: &StorageServer, file: &str) -> Header {
    if !proto::valid_name(file) {
        return error_header("Invalid filename");
    }
    if ss.store.contains(file) {
        return error_header("File already exists");
    }
    if let Err(err) = tokio::fs::write(ss.layout.file(file), b"").await {
        warn!(%file, %err, "create failed");
        return error_header("Internal error");
    }
    match ss.store.add(file) {
        Ok(_) => out_header(MsgType::Ack, file),
        Err(err) => {
            warn!(%file, %err, "metadata rewrite failed on create");
            error_header("Internal error")
        }
    }
}
