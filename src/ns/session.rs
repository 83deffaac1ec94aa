//! Storage-server registration on the name-server side.
//!
//! The handler allocates a slot, acknowledges, ingests the file
//! manifest, then parks the socket in the registry and returns; from
//! that point request handlers drive the session under the slot's lock.

use std::sync::Arc;

use tracing::{info, warn};

use crate::ns::registry::SessionIo;
use crate::ns::NameServer;
use crate::proto::payload::{FileSync, SsRegistration};
use crate::proto::{header, Component, Header, MsgType};

pub async fn handle<S: SessionIo + 'static>(
    ns: Arc<NameServer>,
    mut stream: S,
    first: Header,
    peer: String,
) {
    if first.msg_type != MsgType::Register {
        warn!(%peer, msg = ?first.msg_type, "storage server opened with a non-register message");
        let reply = Header::error(
            Component::NameServer,
            Component::StorageServer,
            "Expected registration",
        );
        let _ = header::write_message(&mut stream, reply, &[]).await;
        return;
    }

    let payload = match header::read_payload(&mut stream, first.payload_len).await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%peer, %err, "failed to read registration payload");
            return;
        }
    };
    let addr = match SsRegistration::decode(&payload) {
        Ok(addr) => addr,
        Err(err) => {
            warn!(%peer, %err, "malformed registration payload");
            return;
        }
    };

    let Some(slot) = ns.registry.reserve(addr) else {
        warn!(%peer, "registry full, refusing storage server");
        let reply =
            Header::error(Component::NameServer, Component::StorageServer, "Registry full");
        let _ = header::write_message(&mut stream, reply, &[]).await;
        return;
    };

    let ack = Header::new(MsgType::Ack, Component::NameServer, Component::StorageServer);
    if let Err(err) = header::write_message(&mut stream, ack, &[]).await {
        warn!(%peer, slot, %err, "failed to acknowledge registration");
        ns.drop_storage_server(slot);
        return;
    }

    // manifest sync: zero or more register_file records, then
    // register_complete
    let mut files = 0usize;
    loop {
        let (record_header, body) = match header::read_message(&mut stream).await {
            Ok(message) => message,
            Err(err) => {
                warn!(%peer, slot, %err, "disconnected during manifest sync");
                ns.drop_storage_server(slot);
                return;
            }
        };

        match record_header.msg_type {
            MsgType::RegisterFile => match FileSync::decode(&body) {
                Ok(record) => {
                    // conflicts are logged by the catalog and skipped
                    ns.catalog.rebuild_add(slot, &record);
                    files += 1;
                }
                Err(err) => {
                    warn!(%peer, slot, %err, "malformed manifest record");
                    ns.drop_storage_server(slot);
                    return;
                }
            },
            MsgType::RegisterComplete => break,
            other => {
                warn!(%peer, slot, msg = ?other, "unexpected message during manifest sync");
                ns.drop_storage_server(slot);
                return;
            }
        }
    }

    ns.registry.attach(slot, Box::new(stream));
    info!(%peer, slot, files, "storage server registration complete");
    // the handler's job ends here; the socket stays parked in the slot
}
