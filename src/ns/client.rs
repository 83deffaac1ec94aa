//! Per-client request dispatch.
//!
//! One task per client connection. The first message must register the
//! client; afterwards requests are decoded into [`Request`] variants
//! and handled one at a time, so operations from one client are
//! strictly ordered on its connection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ns::index::{
    DeleteOutcome, GrantOutcome, MoveFolderOutcome, RevokeOutcome, SetFolderOutcome,
};
use crate::ns::registry::{self, SessionIo};
use crate::ns::{ack_header, error_to_client, exec, to_ss, NameServer};
use crate::proto::payload::{self, FileInfo, MetadataPatch};
use crate::proto::{
    self, header, valid_folder, valid_name, Header, MsgType, Permission, Request,
};

enum Flow {
    Continue,
    /// The request was terminal (exec) or the connection is done.
    Close,
}

enum SsFailure {
    /// The slot has no parked session.
    Inactive,
    /// The transaction failed; the slot has been purged.
    Broken,
}

pub async fn handle<S: SessionIo>(ns: Arc<NameServer>, mut stream: S, first: Header, peer: String) {
    if first.msg_type != MsgType::RegisterClient || !valid_name(&first.name) {
        warn!(%peer, msg = ?first.msg_type, "rejecting client with bad first message");
        let reply = error_to_client("Expected client registration");
        let _ = header::write_message(&mut stream, reply, &[]).await;
        return;
    }
    let user = first.name.clone();
    ns.users.register(&user);
    if header::write_message(&mut stream, ack_header(), &[]).await.is_err() {
        ns.users.deregister(&user);
        return;
    }
    info!(%peer, %user, "client session opened");

    loop {
        let (request_header, body) = match header::read_message(&mut stream).await {
            Ok(message) => message,
            Err(err) => {
                if !matches!(err, proto::Error::Io(_)) {
                    warn!(%peer, %user, %err, "protocol violation, closing");
                    let _ = header::write_message(
                        &mut stream,
                        error_to_client("Protocol violation"),
                        &[],
                    )
                    .await;
                }
                break;
            }
        };

        let request = match Request::decode(&request_header, &body) {
            Ok(request) => request,
            Err(err) => {
                warn!(%peer, %user, %err, "undecodable request");
                if header::write_message(&mut stream, error_to_client("Bad request"), &[])
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        debug!(%user, ?request, "dispatching");
        match dispatch(&ns, &mut stream, &user, request).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(err) => {
                warn!(%peer, %user, %err, "client connection failed");
                break;
            }
        }
    }

    ns.users.deregister(&user);
    info!(%peer, %user, "client session closed");
}

async fn reply<S: SessionIo>(
    stream: &mut S,
    msg_type: MsgType,
    name: &str,
    body: &[u8],
) -> proto::Result<()> {
    let header = Header::with_name(
        msg_type,
        proto::Component::NameServer,
        proto::Component::Client,
        name,
    );
    header::write_message(stream, header, body).await
}

async fn ack<S: SessionIo>(stream: &mut S) -> proto::Result<Flow> {
    header::write_message(stream, ack_header(), &[]).await?;
    Ok(Flow::Continue)
}

async fn refuse<S: SessionIo>(stream: &mut S, reason: &str) -> proto::Result<Flow> {
    header::write_message(stream, error_to_client(reason), &[]).await?;
    Ok(Flow::Continue)
}

/// One transaction against a slot's parked session. A broken session
/// purges the slot before reporting failure.
async fn ss_transact(
    ns: &NameServer,
    slot: usize,
    request: Header,
    body: &[u8],
) -> Result<(Header, Vec<u8>), SsFailure> {
    let Some(session) = ns.registry.session(slot) else {
        return Err(SsFailure::Inactive);
    };
    match registry::transact(&session, request, body).await {
        Ok(message) => Ok(message),
        Err(err) => {
            warn!(slot, %err, "storage server transaction failed, purging slot");
            ns.drop_storage_server(slot);
            Err(SsFailure::Broken)
        }
    }
}

/// Mirrors a storage-server reply back to the client: its ACK becomes
/// our ACK, its error string is forwarded.
async fn mirror<S: SessionIo>(
    stream: &mut S,
    result: Result<(Header, Vec<u8>), SsFailure>,
) -> proto::Result<Flow> {
    match result {
        Ok((resp, _)) if resp.msg_type == MsgType::Ack => ack(stream).await,
        Ok((resp, _)) if resp.msg_type == MsgType::Error => refuse(stream, &resp.name).await,
        Ok((resp, _)) => {
            warn!(msg = ?resp.msg_type, "unexpected storage server reply");
            refuse(stream, "Storage server sent an unexpected reply").await
        }
        Err(_) => refuse(stream, "Storage server unavailable, retry later").await,
    }
}

async fn dispatch<S: SessionIo>(
    ns: &NameServer,
    stream: &mut S,
    user: &str,
    request: Request,
) -> proto::Result<Flow> {
    match request {
        Request::RegisterClient { .. } => refuse(stream, "Already registered").await,

        Request::Create { name } => create(ns, stream, user, &name).await,

        Request::Delete { name } => match ns.catalog.delete(&name, user) {
            DeleteOutcome::Removed(slot) => {
                ns.cache.invalidate(&name);
                // storage failure is tolerated here: the index is
                // already consistent and the byte copy is orphaned
                // until the server re-registers
                let _ = ss_transact(ns, slot, to_ss(MsgType::Delete, &name), &[]).await;
                ack(stream).await
            }
            DeleteOutcome::NotFound => refuse(stream, "File not found").await,
            DeleteOutcome::Denied => refuse(stream, "Access denied").await,
        },

        Request::Undo { name } => {
            if !ns.catalog.contains(&name) {
                return refuse(stream, "File not found").await;
            }
            if !ns.catalog.check_permission(&name, user, Permission::Write) {
                return refuse(stream, "Access denied (write permission required)").await;
            }
            let Some(slot) = ns.locate(&name) else {
                return refuse(stream, "File not found").await;
            };
            let result = ss_transact(ns, slot, to_ss(MsgType::Undo, &name), &[]).await;
            mirror(stream, result).await
        }

        Request::Info { name } => info_request(ns, stream, user, &name).await,

        Request::Read { name } | Request::Stream { name } => {
            redirect(ns, stream, user, &name, Permission::Read, MsgType::ReadRedirect).await
        }
        Request::ViewCheckpoint { name } | Request::ListCheckpoints { name } => {
            redirect(ns, stream, user, &name, Permission::Read, MsgType::ReadRedirect).await
        }
        Request::Write { name } | Request::Checkpoint { name } | Request::Revert { name } => {
            redirect(ns, stream, user, &name, Permission::Write, MsgType::ReadRedirect).await
        }
        Request::LocateFile { name } => {
            // no permission filter: the access-request workflow needs a
            // route before any ACL entry exists
            redirect(ns, stream, user, &name, Permission::None, MsgType::LocateResponse).await
        }

        Request::AddAccess { name, grant } => {
            match ns.catalog.grant(&name, user, &grant.user, grant.perm) {
                GrantOutcome::Granted => {
                    let Some(slot) = ns.locate(&name) else {
                        return refuse(stream, "File not found").await;
                    };
                    let body = grant.encode()?;
                    let result =
                        ss_transact(ns, slot, to_ss(MsgType::InternalAddAccess, &name), &body)
                            .await;
                    mirror(stream, result).await
                }
                GrantOutcome::NotFound => refuse(stream, "File not found").await,
                GrantOutcome::Denied => refuse(stream, "Access denied").await,
                GrantOutcome::AclFull => refuse(stream, "Access list is full").await,
            }
        }

        Request::RemAccess { name, user: target } => {
            match ns.catalog.revoke(&name, user, &target) {
                RevokeOutcome::Revoked => {
                    let Some(slot) = ns.locate(&name) else {
                        return refuse(stream, "File not found").await;
                    };
                    let body = payload::encode_string(&target)?;
                    let result =
                        ss_transact(ns, slot, to_ss(MsgType::InternalRemAccess, &name), &body)
                            .await;
                    mirror(stream, result).await
                }
                RevokeOutcome::NotFound => refuse(stream, "File not found").await,
                RevokeOutcome::Denied => refuse(stream, "Access denied").await,
            }
        }

        Request::List => {
            let body = ns.users.render();
            reply(stream, MsgType::ListResponse, "", body.as_bytes()).await?;
            Ok(Flow::Continue)
        }

        Request::View(flags) => {
            if flags.long {
                refresh_metadata(ns, None).await;
            }
            let body = ns.catalog.render_root(user, flags);
            reply(stream, MsgType::ViewResponse, "", body.as_bytes()).await?;
            Ok(Flow::Continue)
        }

        Request::ViewFolder(args) => {
            if args.flags.long {
                refresh_metadata(ns, Some(&args.folder)).await;
            }
            let body = ns.catalog.render_folder(&args.folder, user, args.flags);
            reply(stream, MsgType::ViewResponse, "", body.as_bytes()).await?;
            Ok(Flow::Continue)
        }

        Request::CreateFolder { name } => {
            if !valid_folder(&name) {
                return refuse(stream, "Invalid folder name").await;
            }
            if ns.catalog.add_folder(&name, user) {
                ack(stream).await
            } else {
                refuse(stream, "Folder already exists").await
            }
        }

        Request::MoveFile { name, folder } => move_file(ns, stream, user, &name, &folder).await,

        Request::MoveFolder { src, dst } => move_folder(ns, stream, user, &src, &dst).await,

        Request::SsDeadReport(addr) => {
            match ns.registry.slot_by_addr(&addr.ip, addr.port) {
                Some(slot) => {
                    info!(slot, ip = %addr.ip, port = addr.port, "client reported dead storage server");
                    ns.drop_storage_server(slot);
                }
                None => {
                    debug!(ip = %addr.ip, port = addr.port, "dead-server report for unknown address");
                }
            }
            ack(stream).await
        }

        Request::Exec { name } => {
            exec::handle(ns, stream, user, &name).await;
            Ok(Flow::Close)
        }
    }
}

async fn create<S: SessionIo>(
    ns: &NameServer,
    stream: &mut S,
    user: &str,
    name: &str,
) -> proto::Result<Flow> {
    if !valid_name(name) {
        return refuse(stream, "Invalid filename").await;
    }
    if ns.catalog.contains(name) {
        return refuse(stream, "File already exists").await;
    }
    let Some(slot) = ns.registry.pick_for_create() else {
        return refuse(stream, "No storage servers available").await;
    };

    match ss_transact(ns, slot, to_ss(MsgType::Create, name), &[]).await {
        Ok((resp, _)) if resp.msg_type == MsgType::Ack => {
            if !ns.catalog.add(name, slot, user) {
                return refuse(stream, "File already exists").await;
            }
            // fire-and-forget: ownership metadata on the storage side,
            // no reply awaited
            if let Some(session) = ns.registry.session(slot) {
                let body = payload::encode_string(user)?;
                if let Err(err) =
                    registry::send_only(&session, to_ss(MsgType::InternalSetOwner, name), &body)
                        .await
                {
                    warn!(slot, %err, "set-owner send failed, purging slot");
                    ns.drop_storage_server(slot);
                }
            }
            ack(stream).await
        }
        Ok((resp, _)) if resp.msg_type == MsgType::Error => refuse(stream, &resp.name).await,
        Ok(_) => refuse(stream, "Storage server sent an unexpected reply").await,
        Err(_) => refuse(stream, "Storage server unavailable, retry later").await,
    }
}

async fn info_request<S: SessionIo>(
    ns: &NameServer,
    stream: &mut S,
    user: &str,
    name: &str,
) -> proto::Result<Flow> {
    let Some(record) = ns.catalog.details(name) else {
        return refuse(stream, "File not found").await;
    };
    if !record.permits(user, Permission::Read) {
        return refuse(stream, "Access denied").await;
    }
    let Some(slot) = ns.locate(name) else {
        return refuse(stream, "File not found").await;
    };
    let Some(addr) = ns.registry.public_addr(slot) else {
        return refuse(stream, "File is on an inactive server").await;
    };

    // stats are authoritative on the storage server; patch before
    // assembling the combined record
    if let Ok((resp, body)) =
        ss_transact(ns, slot, to_ss(MsgType::InternalGetMetadata, name), &[]).await
    {
        if resp.msg_type == MsgType::InternalMetadataResp {
            if let Ok(patch) = MetadataPatch::decode(&body) {
                ns.catalog.apply_metadata(name, &patch);
            }
        }
    }
    let Some(record) = ns.catalog.details(name) else {
        return refuse(stream, "File not found").await;
    };

    let info = FileInfo {
        filename: record.name,
        owner: record.owner,
        ss_ip: addr.ip,
        ss_port: addr.port,
        acl: record.acl,
        word_count: record.word_count,
        char_count: record.char_count,
        created: record.created,
        modified: record.modified,
        last_accessed: record.last_accessed,
        last_accessed_by: record.last_accessed_by,
    };
    reply(stream, MsgType::InfoResponse, name, &info.encode()?).await?;
    Ok(Flow::Continue)
}

/// The redirect pattern shared by every direct-storage command: check
/// permission, resolve the slot, hand the client the server's public
/// address.
async fn redirect<S: SessionIo>(
    ns: &NameServer,
    stream: &mut S,
    user: &str,
    name: &str,
    required: Permission,
    response: MsgType,
) -> proto::Result<Flow> {
    let Some(record) = ns.catalog.details(name) else {
        return refuse(stream, "File not found").await;
    };
    if required != Permission::None && !record.permits(user, required) {
        // deliberately does not confirm existence
        return refuse(stream, "Access denied").await;
    }
    let Some(slot) = ns.locate(name) else {
        return refuse(stream, "File not found").await;
    };
    let Some(addr) = ns.registry.public_addr(slot) else {
        return refuse(stream, "File is on an inactive server").await;
    };
    reply(stream, response, name, &addr.encode()?).await?;
    Ok(Flow::Continue)
}

async fn move_file<S: SessionIo>(
    ns: &NameServer,
    stream: &mut S,
    user: &str,
    name: &str,
    folder: &str,
) -> proto::Result<Flow> {
    if !folder.is_empty() && !valid_folder(folder) {
        return refuse(stream, "Invalid folder name").await;
    }
    if !folder.is_empty() && !ns.catalog.folder_exists(folder) {
        return refuse(stream, "Folder not found").await;
    }
    match ns.catalog.set_file_folder(name, folder, user) {
        SetFolderOutcome::Moved(slot) => {
            let body = payload::encode_string(folder)?;
            let result =
                ss_transact(ns, slot, to_ss(MsgType::InternalSetFolder, name), &body).await;
            mirror(stream, result).await
        }
        SetFolderOutcome::NotFound => refuse(stream, "File not found").await,
        SetFolderOutcome::Denied => refuse(stream, "Access denied").await,
    }
}

async fn move_folder<S: SessionIo>(
    ns: &NameServer,
    stream: &mut S,
    user: &str,
    src: &str,
    dst: &str,
) -> proto::Result<Flow> {
    if !valid_folder(src) || !valid_folder(dst) {
        return refuse(stream, "Invalid folder name").await;
    }
    match ns.catalog.move_folder(src, dst, user) {
        MoveFolderOutcome::Moved(updates) => {
            // best effort: the index is authoritative, storage-side
            // folder fields follow one file at a time
            for update in updates {
                ns.cache.invalidate(&update.name);
                let body = payload::encode_string(&update.folder)?;
                match ss_transact(
                    ns,
                    update.slot,
                    to_ss(MsgType::InternalSetFolder, &update.name),
                    &body,
                )
                .await
                {
                    Ok((resp, _)) if resp.msg_type == MsgType::Ack => {}
                    Ok((resp, _)) => warn!(
                        file = %update.name,
                        reply = ?resp.msg_type,
                        "storage server refused folder update"
                    ),
                    Err(_) => warn!(file = %update.name, "folder update lost with its server"),
                }
            }
            ack(stream).await
        }
        MoveFolderOutcome::NotFound => refuse(stream, "Folder not found").await,
        MoveFolderOutcome::Denied => refuse(stream, "Access denied").await,
        MoveFolderOutcome::Exists => refuse(stream, "Destination folder already exists").await,
    }
}

/// The long-listing refresh: snapshot (filename, slot) pairs, then one
/// get-metadata transaction per file, re-locking the catalog only to
/// patch fields. Neither lock is ever held across the network round
/// trip.
async fn refresh_metadata(ns: &NameServer, folder: Option<&str>) {
    for (name, slot) in ns.catalog.files_snapshot(folder) {
        match ss_transact(ns, slot, to_ss(MsgType::InternalGetMetadata, &name), &[]).await {
            Ok((resp, body)) if resp.msg_type == MsgType::InternalMetadataResp => {
                match MetadataPatch::decode(&body) {
                    Ok(patch) => ns.catalog.apply_metadata(&name, &patch),
                    Err(err) => warn!(%name, %err, "bad metadata payload"),
                }
            }
            Ok((resp, _)) => warn!(%name, reply = ?resp.msg_type, "metadata refresh refused"),
            Err(_) => debug!(%name, "metadata refresh skipped, server unavailable"),
        }
    }
}
