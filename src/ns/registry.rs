//! The storage-server registry: a fixed array of slots, each owning one
//! parked session stream guarded by a dedicated async lock.
//!
//! Every request/response transaction on a session runs under its
//! slot's lock - send then receive, nothing else. Slot metadata (active
//! flag, public address, round-robin cursor) lives behind a separate
//! plain mutex that is never held across I/O.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::proto::payload::SsRegistration;
use crate::proto::{self, header, Header};

/// Capacity of the registry.
pub const MAX_STORAGE_SERVERS: usize = 10;

/// Object-safe alias for a parked session stream; integration tests
/// park duplex pipes in slots the same way the server parks sockets.
pub trait SessionIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionIo for T {}

pub type SessionStream = Box<dyn SessionIo>;

enum SlotState {
    Free,
    /// Allocated during registration; not yet eligible for traffic.
    Reserved { addr: SsRegistration },
    Active { addr: SsRegistration, session: Arc<AsyncMutex<SessionStream>> },
}

struct State {
    slots: Vec<SlotState>,
    cursor: usize,
}

pub struct SsRegistry {
    state: Mutex<State>,
}

impl Default for SsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SsRegistry {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_STORAGE_SERVERS);
        slots.resize_with(MAX_STORAGE_SERVERS, || SlotState::Free);
        Self { state: Mutex::new(State { slots, cursor: 0 }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims a free slot for a registering server. The slot carries
    /// the public address immediately but serves no traffic until
    /// [`SsRegistry::attach`].
    pub fn reserve(&self, addr: SsRegistration) -> Option<usize> {
        let mut state = self.lock();
        let index = state.slots.iter().position(|s| matches!(s, SlotState::Free))?;
        info!(slot = index, ip = %addr.ip, port = addr.port, "storage server slot reserved");
        state.slots[index] = SlotState::Reserved { addr };
        Some(index)
    }

    /// Parks the session stream, making the slot active.
    pub fn attach(&self, slot: usize, stream: SessionStream) {
        let mut state = self.lock();
        if let Some(entry) = state.slots.get_mut(slot) {
            if let SlotState::Reserved { addr } = entry {
                let addr = addr.clone();
                *entry =
                    SlotState::Active { addr, session: Arc::new(AsyncMutex::new(stream)) };
                info!(slot, "storage server active");
            }
        }
    }

    /// Frees a slot (failed registration or detected death). Returns
    /// true when the slot was in use.
    pub fn deactivate(&self, slot: usize) -> bool {
        let mut state = self.lock();
        match state.slots.get_mut(slot) {
            Some(entry) if !matches!(entry, SlotState::Free) => {
                *entry = SlotState::Free;
                info!(slot, "storage server removed");
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, slot: usize) -> bool {
        matches!(self.lock().slots.get(slot), Some(SlotState::Active { .. }))
    }

    /// Next active slot in round-robin order for a new file.
    pub fn pick_for_create(&self) -> Option<usize> {
        let mut state = self.lock();
        let len = state.slots.len();
        for step in 0..len {
            let index = (state.cursor + step) % len;
            if matches!(state.slots[index], SlotState::Active { .. }) {
                state.cursor = (index + 1) % len;
                return Some(index);
            }
        }
        None
    }

    pub fn public_addr(&self, slot: usize) -> Option<SsRegistration> {
        match self.lock().slots.get(slot) {
            Some(SlotState::Active { addr, .. }) => Some(addr.clone()),
            _ => None,
        }
    }

    /// Supports the client's dead-server report path.
    pub fn slot_by_addr(&self, ip: &str, port: u16) -> Option<usize> {
        self.lock().slots.iter().position(|s| {
            matches!(s, SlotState::Active { addr, .. } if addr.ip == ip && addr.port == port)
        })
    }

    /// The session handle for a slot; transactions lock it themselves.
    pub fn session(&self, slot: usize) -> Option<Arc<AsyncMutex<SessionStream>>> {
        match self.lock().slots.get(slot) {
            Some(SlotState::Active { session, .. }) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().slots.iter().filter(|s| matches!(s, SlotState::Active { .. })).count()
    }
}

/// One request/response transaction on a session: send the message,
/// await the reply, all under the session lock.
pub async fn transact(
    session: &AsyncMutex<SessionStream>,
    request: Header,
    payload: &[u8],
) -> proto::Result<(Header, Vec<u8>)> {
    let mut stream = session.lock().await;
    header::write_message(&mut *stream, request, payload).await?;
    header::read_message(&mut *stream).await
}

/// A one-way internal message with no awaited reply (set-owner).
pub async fn send_only(
    session: &AsyncMutex<SessionStream>,
    request: Header,
    payload: &[u8],
) -> proto::Result<()> {
    let mut stream = session.lock().await;
    header::write_message(&mut *stream, request, payload).await
}
