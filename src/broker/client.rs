//! Server- and client-side rendezvous helpers: speak the broker's wire
//! protocol, then hand the resulting connection straight to the session
//! engine. Neither the `legato-demo` binary nor application code built on
//! this crate touches [`crate::seqpacket`] or [`super::wire`] directly —
//! this is the seam between them.

use std::path::Path;

use crate::error::{IpcError, Result};
use crate::protocol::Protocol;
use crate::seqpacket::SeqPacketConn;
use crate::session::{self, transport::UnixTransport, Handlers, Role, SessionHandle};

use super::wire::{ControlByte, OfferOpenRecord};

/// A live advertisement. Dropping this without calling [`Advertisement::withdraw`]
/// leaves the advertisement running in the background — call `withdraw` to
/// tear it down deterministically.
pub struct Advertisement {
    task: tokio::task::JoinHandle<()>,
}

impl Advertisement {
    /// Closes the offer connection, which the broker observes as the server
    /// going away, and stops accepting any further forwarded sessions.
    pub fn withdraw(self) {
        self.task.abort();
    }
}

/// Advertise `protocol`/`instance_name` with the broker at `offers_path`.
/// Every inbound session gets its own actor built from a clone of
/// `handlers`, matching the original framework's "one handler set per
/// advertised interface, shared by every session of it" rule.
pub async fn advertise(
    offers_path: &Path,
    protocol: Protocol,
    instance_name: impl Into<String>,
    handlers: Handlers,
) -> Result<Advertisement> {
    let instance_name = instance_name.into();
    let conn = SeqPacketConn::connect(offers_path).await.map_err(IpcError::from)?;
    let record = OfferOpenRecord {
        max_payload: protocol.max_payload() as u64,
        protocol_id: protocol.id().to_string(),
        instance_name: instance_name.clone(),
    };
    conn.send(&record.to_bytes(), None).await.map_err(IpcError::from)?;

    let task = tokio::spawn(async move {
        loop {
            match conn.recv(1).await {
                Ok(Some((_, Some(fd)))) => {
                    let session_conn = match SeqPacketConn::from_owned_fd(fd) {
                        Ok(c) => c,
                        Err(e) => {
                            tracing::warn!(error = %e, "wrapping forwarded session fd");
                            continue;
                        }
                    };
                    if let Err(e) = session_conn
                        .send(&[ControlByte::Welcome.to_byte()], None)
                        .await
                    {
                        tracing::warn!(error = %e, "sending welcome to new session");
                        continue;
                    }
                    let transport = UnixTransport::new(session_conn, protocol.clone());
                    let _handle = session::spawn_open(Role::Server, transport, handlers.clone());
                }
                Ok(Some((_, None))) => continue,
                Ok(None) | Err(_) => break,
            }
        }
        tracing::debug!(
            protocol = %record.protocol_id,
            instance = %record.instance_name,
            "offer connection ended"
        );
    });

    Ok(Advertisement { task })
}

/// Open a session to whoever is advertising `protocol`/`instance_name` with
/// the broker at `opens_path`. Resolves once the server's welcome arrives,
/// or fails with [`IpcError::NotFound`]/[`IpcError::NotPermitted`]/
/// [`IpcError::Fault`] on denial — this is the `open_sync` style of the
/// original API; an `open_async` variant is just this future spawned and
/// polled to completion from wherever the caller likes.
pub async fn connect(
    opens_path: &Path,
    protocol: Protocol,
    instance_name: impl Into<String>,
    handlers: Handlers,
) -> Result<SessionHandle> {
    let instance_name = instance_name.into();
    let conn = SeqPacketConn::connect(opens_path).await.map_err(IpcError::from)?;
    let record = OfferOpenRecord {
        max_payload: protocol.max_payload() as u64,
        protocol_id: protocol.id().to_string(),
        instance_name: instance_name.clone(),
    };
    conn.send(&record.to_bytes(), None).await.map_err(IpcError::from)?;

    let (reply, _) = conn
        .recv(1)
        .await
        .map_err(IpcError::from)?
        .ok_or(IpcError::Closed)?;
    match reply.first().copied().and_then(ControlByte::from_byte) {
        Some(ControlByte::Welcome) => {}
        Some(ControlByte::DeniedNotPermitted) => {
            return Err(IpcError::NotPermitted(format!(
                "broker denied open of {}/{instance_name}",
                protocol.id()
            )))
        }
        Some(ControlByte::DeniedMaxPayloadMismatch) => {
            return Err(IpcError::Fault(format!(
                "max_payload mismatch opening {}/{instance_name}",
                protocol.id()
            )))
        }
        Some(ControlByte::DeniedNotFound) | None => {
            return Err(IpcError::NotFound {
                protocol: protocol.id().to_string(),
                instance: instance_name,
            })
        }
    }

    let transport = UnixTransport::new(conn, protocol);
    Ok(session::spawn_open(Role::Client, transport, handlers))
}
