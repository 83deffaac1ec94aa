//! The storage server: owns file bytes on disk, serves direct client
//! connections over the textual protocol, and keeps one control session
//! open to the name server.

pub mod checkpoint;
pub mod control;
pub mod layout;
pub mod locks;
pub mod requests;
pub mod sentence;
pub mod store;
pub mod text;
pub mod undo;
pub mod write;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::SsConfig;
use crate::proto::payload::SsRegistration;
use layout::Layout;
use locks::LockTable;
use store::MetaStore;

/// Shared state of one storage server process.
pub struct StorageServer {
    pub layout: Layout,
    pub store: MetaStore,
    pub locks: LockTable,
    /// Per-file commit critical sections.
    commits: DashMap<String, Arc<Mutex<()>>>,
    /// Address advertised to clients through the name server.
    pub public: SsRegistration,
    conn_ids: AtomicU64,
}

impl StorageServer {
    pub fn new(layout: Layout, store: MetaStore, public: SsRegistration) -> Self {
        Self {
            layout,
            store,
            locks: LockTable::new(),
            commits: DashMap::new(),
            public,
            conn_ids: AtomicU64::new(1),
        }
    }

    /// The commit mutex for `file`; commits to the same file serialise
    /// through it while commits to different files proceed in parallel.
    pub(crate) fn commit_lock(&self, file: &str) -> Arc<Mutex<()>> {
        self.commits.entry(file.to_owned()).or_default().clone()
    }

    pub fn next_conn_id(&self) -> u64 {
        self.conn_ids.fetch_add(1, Ordering::Relaxed)
    }
}

/// Runs a storage server until SIGINT or loss of the name server.
pub async fn run(cfg: SsConfig) -> io::Result<()> {
    let layout = Layout::new(cfg.base_dir.clone());
    layout.create_dirs()?;
    let (store, loaded) = MetaStore::open(&layout)?;
    info!(rows = loaded, base = %layout.base().display(), "metadata table loaded");

    let public = SsRegistration { ip: cfg.ip.clone(), port: cfg.port };
    let ss = Arc::new(StorageServer::new(layout, store, public));

    let ns_stream = TcpStream::connect((cfg.ns_ip.as_str(), cfg.ns_port)).await?;
    ns_stream.set_nodelay(true)?;
    info!(ns = %format!("{}:{}", cfg.ns_ip, cfg.ns_port), "connected to name server");

    let mut control_task = {
        let ss = Arc::clone(&ss);
        tokio::spawn(async move {
            if let Err(err) = control::register_and_serve(ss, ns_stream).await {
                error!(%err, "name server session ended");
            }
        })
    };

    let listener = TcpListener::bind((cfg.ip.as_str(), cfg.port)).await?;
    info!(addr = %format!("{}:{}", cfg.ip, cfg.port), "listening for clients");

    let mut clients = tokio::task::JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let _ = socket.set_nodelay(true);
                        let ss = Arc::clone(&ss);
                        let conn = ss.next_conn_id();
                        info!(%peer, conn, "client connected");
                        clients.spawn(async move {
                            text::handle(ss, socket, conn).await;
                        });
                    }
                    Err(err) => warn!(%err, "accept failed"),
                }
            }
            // reap finished sessions so the set stays small
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down");
                break;
            }
            _ = &mut control_task => {
                error!("control session lost, shutting down");
                break;
            }
        }
    }

    // Close the name-server socket, then every direct-client socket,
    // and drain their tasks. Metadata is already on disk from the
    // per-mutation rewrites.
    drop(listener);
    control_task.abort();
    let open = clients.len();
    if open > 0 {
        info!(connections = open, "closing direct-client sessions");
    }
    clients.shutdown().await;
    info!("shutdown complete");
    Ok(())
}
