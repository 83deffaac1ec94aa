//! The executor: fetches a file's bytes over the storage-server session
//! and pipes them through a subprocess back to the client.
//!
//! Executing stored bytes as a command line is a deliberate feature of
//! the service and a security boundary; it can be switched off with the
//! `exec_enabled` config key. The command is terminal: once the
//! subprocess ends the client connection is closed, and the client is
//! expected to reconnect and re-register.

use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::ns::registry::{self, SessionIo};
use crate::ns::{error_to_client, to_ss, NameServer};
use crate::proto::{header, MsgType, Permission};

async fn fail<S: SessionIo>(stream: &mut S, reason: &str) {
    let _ = header::write_message(stream, error_to_client(reason), &[]).await;
}

/// Handles an exec request. The connection is always finished when this
/// returns; the caller closes it.
pub async fn handle<S: SessionIo>(ns: &NameServer, stream: &mut S, user: &str, name: &str) {
    if !ns.exec_enabled {
        fail(stream, "Exec is disabled on this server").await;
        return;
    }
    if !ns.catalog.contains(name) {
        fail(stream, "File not found").await;
        return;
    }
    if !ns.catalog.check_permission(name, user, Permission::Read) {
        fail(stream, "Access denied (read permission required)").await;
        return;
    }
    let Some(slot) = ns.locate(name) else {
        fail(stream, "File not found").await;
        return;
    };
    let Some(session) = ns.registry.session(slot) else {
        fail(stream, "File is on an inactive server").await;
        return;
    };

    let fetched =
        registry::transact(&session, to_ss(MsgType::InternalRead, name), &[]).await;
    let bytes = match fetched {
        Ok((resp, body)) if resp.msg_type == MsgType::InternalData => body,
        Ok((resp, _)) => {
            fail(stream, &format!("Storage server refused the read: {}", resp.name)).await;
            return;
        }
        Err(err) => {
            warn!(slot, %err, "storage server session failed during exec");
            ns.drop_storage_server(slot);
            fail(stream, "Storage server unavailable, retry later").await;
            return;
        }
    };

    let command_line = String::from_utf8_lossy(&bytes).trim().to_string();
    if command_line.is_empty() {
        fail(stream, "File is empty").await;
        return;
    }
    info!(%user, %name, %command_line, "executing file content");

    let mut child = match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!(%err, "failed to spawn subprocess");
            fail(stream, "Failed to execute command on server").await;
            return;
        }
    };

    // stream subprocess stdout to the client as raw bytes
    if let Some(mut stdout) = child.stdout.take() {
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tokio::io::AsyncWriteExt::write_all(stream, &buf[..n]).await.is_err() {
                        warn!(%user, "client disconnected during exec output");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "reading subprocess output failed");
                    break;
                }
            }
        }
        let _ = tokio::io::AsyncWriteExt::flush(stream).await;
    }
    let _ = child.wait().await;
    info!(%user, %name, "exec complete, closing client connection");
}
