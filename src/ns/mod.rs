//! The name server: indexes every file in the deployment, coordinates
//! the storage servers and answers or redirects client commands.

pub mod cache;
pub mod client;
pub mod exec;
pub mod folders;
pub mod index;
pub mod registry;
pub mod session;
pub mod users;

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::NsConfig;
use crate::proto::{header, Component, Header, MsgType};
use cache::LookupCache;
use index::Catalog;
use registry::{SessionIo, SsRegistry};
use users::ActiveUsers;

/// Shared state of the name server process.
pub struct NameServer {
    pub catalog: Catalog,
    pub cache: LookupCache,
    pub users: ActiveUsers,
    pub registry: SsRegistry,
    pub exec_enabled: bool,
}

impl NameServer {
    pub fn new(exec_enabled: bool) -> Self {
        Self {
            catalog: Catalog::new(),
            cache: LookupCache::new(),
            users: ActiveUsers::new(),
            registry: SsRegistry::new(),
            exec_enabled,
        }
    }

    /// Removes a storage server: frees its slot, purges its trie
    /// records and invalidates their cache entries. Safe to call twice.
    pub fn drop_storage_server(&self, slot: usize) {
        if self.registry.deactivate(slot) {
            for name in self.catalog.purge_slot(slot) {
                self.cache.invalidate(&name);
            }
        }
    }

    /// Cache-fronted slot lookup. A cached slot that has gone inactive
    /// falls through to the trie.
    pub fn locate(&self, name: &str) -> Option<usize> {
        if let Some(slot) = self.cache.lookup(name) {
            if self.registry.is_active(slot) {
                return Some(slot);
            }
        }
        let slot = self.catalog.find(name)?;
        self.cache.insert(name, slot);
        Some(slot)
    }
}

/// Runs the name server accept loop forever.
pub async fn run(cfg: NsConfig) -> io::Result<()> {
    let ns = Arc::new(NameServer::new(cfg.exec_enabled));
    let listener = TcpListener::bind((cfg.ip.as_str(), cfg.port)).await?;
    info!(addr = %format!("{}:{}", cfg.ip, cfg.port), "name server listening");

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let _ = socket.set_nodelay(true);
                let ns = Arc::clone(&ns);
                tokio::spawn(async move {
                    route(ns, socket, peer.to_string()).await;
                });
            }
            Err(err) => warn!(%err, "accept failed"),
        }
    }
}

/// Reads the first header off a fresh connection and routes it to the
/// storage-server or client handler.
pub async fn route<S: SessionIo + 'static>(ns: Arc<NameServer>, mut stream: S, peer: String) {
    let first = match header::read_header(&mut stream).await {
        Ok(header) => header,
        Err(err) => {
            warn!(%peer, %err, "connection dropped before identifying itself");
            return;
        }
    };

    match first.source {
        Component::StorageServer => session::handle(ns, stream, first, peer).await,
        Component::Client => client::handle(ns, stream, first, peer).await,
        Component::NameServer => {
            warn!(%peer, "connection claimed to be a name server; closing");
            let reply =
                Header::error(Component::NameServer, Component::Client, "Unknown component");
            let _ = header::write_message(&mut stream, reply, &[]).await;
        }
    }
}

pub(crate) fn ack_header() -> Header {
    Header::new(MsgType::Ack, Component::NameServer, Component::Client)
}

pub(crate) fn error_to_client(reason: &str) -> Header {
    Header::error(Component::NameServer, Component::Client, reason)
}

pub(crate) fn to_ss(msg_type: MsgType, name: &str) -> Header {
    Header::with_name(msg_type, Component::NameServer, Component::StorageServer, name)
}
