//! Interface Registry & Directory Broker (C4).
//!
//! The broker owns two well-known `SOCK_SEQPACKET` sockets and a table of
//! advertised interfaces keyed by `(protocol id, instance name)`. A server
//! connects to the offers socket once per interface and leaves the
//! connection open for the lifetime of the advertisement — its only purpose
//! after the initial [`wire::OfferOpenRecord`] is death detection: an
//! `EOF`/error on that connection means the server (or its whole process)
//! is gone, and the interface is torn down.
//!
//! A client connects to the opens socket, sends its own
//! [`wire::OfferOpenRecord`] naming the interface it wants. The broker
//! resolves it against the interface table and then hands *its own accepted
//! fd for the client's connection* to the matching server over the offer
//! connection, via `SCM_RIGHTS`. After that handoff the client's original
//! connection directly carries session traffic to and from the server; the
//! broker drops out of the data path entirely. On denial, the broker
//! instead replies on the client's own connection with the matching
//! [`wire::ControlByte`] and closes it.
//!
//! If no server has advertised the requested interface yet, the client's
//! connection is parked on a waiting list keyed by `(protocol id, instance
//! name)` instead of being denied; the next matching advertise drains that
//! list the same way it would an in-flight open.

pub mod client;
pub mod wire;

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use slab::Slab;
use tokio::sync::{mpsc, Notify};

use crate::error::{IpcError, Result};
use crate::ids::InterfaceId;
use crate::seqpacket::{SeqPacketConn, SeqPacketListener};
use wire::{ControlByte, OfferOpenRecord, RECORD_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceState {
    Advertised,
    Hidden,
}

/// A connection accepted on the opens socket, resolved against the
/// interface table and now waiting to be forwarded to its server.
struct PendingOpen {
    conn: SeqPacketConn,
}

/// A connection accepted on the opens socket for an interface that hasn't
/// been advertised yet. Kept (not denied) until a matching advertise comes
/// in or the broker is dropped.
struct WaitingOpen {
    conn: SeqPacketConn,
    max_payload: u64,
}

struct Interface {
    max_payload: u64,
    state: InterfaceState,
    forward_tx: mpsc::UnboundedSender<PendingOpen>,
}

/// The interface table: a [`Slab`] arena so that an [`InterfaceId`] handed
/// out to a caller either resolves to the live interface it was minted for
/// or misses cleanly once withdrawn, never aliasing a reused slot silently.
/// Lookup by `(protocol id, instance name)` goes through a side index since
/// advertise/withdraw only ever know the pair, not the slot.
#[derive(Default)]
struct InterfaceTable {
    slots: Slab<Interface>,
    by_name: HashMap<(String, String), InterfaceId>,
}

impl InterfaceTable {
    fn get(&self, key: &(String, String)) -> Option<&Interface> {
        let id = self.by_name.get(key)?;
        self.slots.get(id.0)
    }

    fn insert(&mut self, key: (String, String), interface: Interface) -> InterfaceId {
        let id = InterfaceId(self.slots.insert(interface));
        self.by_name.insert(key, id);
        id
    }

    fn remove(&mut self, key: &(String, String)) {
        if let Some(id) = self.by_name.remove(key) {
            self.slots.remove(id.0);
        }
    }
}

/// The directory broker's in-memory state, reached through the two
/// rendezvous sockets. Cheaply `Clone`-able; every accept task shares the
/// same table.
#[derive(Clone)]
pub struct Broker {
    interfaces: Arc<Mutex<InterfaceTable>>,
    waiting: Arc<Mutex<HashMap<(String, String), Vec<WaitingOpen>>>>,
    ready: Arc<Notify>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self {
            interfaces: Arc::new(Mutex::new(InterfaceTable::default())),
            waiting: Arc::new(Mutex::new(HashMap::new())),
            ready: Arc::new(Notify::new()),
        }
    }

    /// Resolves once both rendezvous sockets are bound and accepting.
    /// Embedders that spawn a `Broker` in-process (rather than via the
    /// `legato-broker` binary) use this instead of the binary's
    /// `--ready-fd` flag.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    /// Stubbed access control: every open is currently allowed. The
    /// original framework checks an IPC-specific access-control list here;
    /// this crate's scope stops at providing the hook for one.
    fn check_permission(&self, _protocol_id: &str, _instance_name: &str) -> bool {
        true
    }

    /// Bind both sockets and run the broker until one of its accept loops
    /// fails. Runs for the caller's lifetime; wrap in `tokio::select!`
    /// against a shutdown signal to stop it early.
    pub async fn run(self, offers_path: &Path, opens_path: &Path) -> Result<()> {
        let offers = SeqPacketListener::bind(offers_path)
            .map_err(|e| IpcError::Fault(format!("binding offers socket: {e}")))?;
        let opens = SeqPacketListener::bind(opens_path)
            .map_err(|e| IpcError::Fault(format!("binding opens socket: {e}")))?;
        self.ready.notify_waiters();

        let offers_broker = self.clone();
        let offers_task = tokio::spawn(async move { offers_broker.run_offers(offers).await });
        let opens_broker = self.clone();
        let opens_task = tokio::spawn(async move { opens_broker.run_opens(opens).await });

        tokio::select! {
            res = offers_task => res.map_err(|e| IpcError::Fault(e.to_string()))?,
            res = opens_task => res.map_err(|e| IpcError::Fault(e.to_string()))?,
        }
    }

    async fn run_offers(self, listener: SeqPacketListener) -> Result<()> {
        loop {
            let (conn, _creds) = listener
                .accept()
                .await
                .map_err(|e| IpcError::Fault(format!("accepting offer: {e}")))?;
            let broker = self.clone();
            tokio::spawn(async move { broker.handle_offer(conn).await });
        }
    }

    async fn run_opens(self, listener: SeqPacketListener) -> Result<()> {
        loop {
            let (conn, _creds) = listener
                .accept()
                .await
                .map_err(|e| IpcError::Fault(format!("accepting open: {e}")))?;
            let broker = self.clone();
            tokio::spawn(async move { broker.handle_open(conn).await });
        }
    }

    async fn handle_offer(&self, conn: SeqPacketConn) {
        let Some((bytes, _)) = conn.recv(RECORD_LEN).await.ok().flatten() else {
            tracing::debug!("offer connection closed before advertising");
            return;
        };
        let Some(record) = OfferOpenRecord::from_bytes(&bytes) else {
            tracing::warn!("offer connection sent a malformed record");
            return;
        };
        let key = (record.protocol_id.clone(), record.instance_name.clone());
        let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<PendingOpen>();

        {
            let mut interfaces = self.interfaces.lock();
            if interfaces.get(&key).is_some() {
                tracing::warn!(
                    protocol = %record.protocol_id,
                    instance = %record.instance_name,
                    "duplicate advertise rejected"
                );
                return;
            }
            let id = interfaces.insert(
                key.clone(),
                Interface {
                    max_payload: record.max_payload,
                    state: InterfaceState::Advertised,
                    forward_tx: forward_tx.clone(),
                },
            );
            tracing::debug!(interface = %id, "registered");
        }
        tracing::info!(protocol = %record.protocol_id, instance = %record.instance_name, "advertised");

        let queued = self.waiting.lock().remove(&key).unwrap_or_default();
        for waiting in queued {
            if waiting.max_payload != record.max_payload {
                let _ = waiting
                    .conn
                    .send(&[ControlByte::DeniedMaxPayloadMismatch.to_byte()], None)
                    .await;
                continue;
            }
            tracing::debug!(
                protocol = %record.protocol_id,
                instance = %record.instance_name,
                "draining a client that was waiting for this advertise"
            );
            let _ = forward_tx.send(PendingOpen { conn: waiting.conn });
        }

        loop {
            tokio::select! {
                pending = forward_rx.recv() => {
                    let Some(PendingOpen { conn: client_conn }) = pending else {
                        break;
                    };
                    let fd = client_conn.as_raw_fd();
                    if let Err(e) = conn.send(&[1u8], Some(fd)).await {
                        tracing::warn!(error = %e, "failed forwarding session fd to server");
                    }
                    // `client_conn` drops here, closing the broker's copy;
                    // the server now holds its own dup of the same peer.
                }
                // Anything read back on the offer connection (there is
                // nothing else to read at steady state) or EOF/error means
                // the server went away.
                death = conn.recv(1) => {
                    match death {
                        Ok(Some(_)) => continue,
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }

        self.interfaces.lock().remove(&key);
        tracing::info!(protocol = %record.protocol_id, instance = %record.instance_name, "withdrawn");
    }

    async fn handle_open(&self, conn: SeqPacketConn) {
        let Some((bytes, _)) = conn.recv(RECORD_LEN).await.ok().flatten() else {
            return;
        };
        let Some(record) = OfferOpenRecord::from_bytes(&bytes) else {
            tracing::warn!("open connection sent a malformed record");
            return;
        };
        let key = (record.protocol_id.clone(), record.instance_name.clone());

        if !self.check_permission(&record.protocol_id, &record.instance_name) {
            let _ = conn
                .send(&[ControlByte::DeniedNotPermitted.to_byte()], None)
                .await;
            return;
        }

        enum Resolution {
            Forward(mpsc::UnboundedSender<PendingOpen>),
            MaxPayloadMismatch,
            NotYetAdvertised,
        }

        let resolution = {
            let interfaces = self.interfaces.lock();
            match interfaces.get(&key) {
                Some(iface) if iface.state == InterfaceState::Advertised => {
                    if iface.max_payload == record.max_payload {
                        Resolution::Forward(iface.forward_tx.clone())
                    } else {
                        Resolution::MaxPayloadMismatch
                    }
                }
                _ => Resolution::NotYetAdvertised,
            }
        };

        match resolution {
            Resolution::Forward(forward_tx) => {
                // From here the client's connection is being handed off;
                // any further reply to the client (the "welcome") is the
                // server's job, sent as the first frame on the now-forwarded
                // connection.
                let _ = forward_tx.send(PendingOpen { conn });
            }
            Resolution::MaxPayloadMismatch => {
                let _ = conn
                    .send(&[ControlByte::DeniedMaxPayloadMismatch.to_byte()], None)
                    .await;
            }
            Resolution::NotYetAdvertised => {
                tracing::debug!(
                    protocol = %record.protocol_id,
                    instance = %record.instance_name,
                    "no server advertising yet, client queued"
                );
                self.waiting.lock().entry(key).or_default().push(WaitingOpen {
                    conn,
                    max_payload: record.max_payload,
                });
            }
        }
    }
}

/// Paths for the two well-known rendezvous sockets, read from the
/// environment with sensible defaults for local development.
pub fn default_offers_path() -> PathBuf {
    std::env::var("LEGATO_IPC_OFFERS_SOCKET")
        .unwrap_or_else(|_| "/tmp/legato-ipc/offers.sock".to_string())
        .into()
}

pub fn default_opens_path() -> PathBuf {
    std::env::var("LEGATO_IPC_OPENS_SOCKET")
        .unwrap_or_else(|_| "/tmp/legato-ipc/opens.sock".to_string())
        .into()
}
