//! Message Objects (C2).
//!
//! A [`Message`] carries a payload, an optional passed file descriptor and
//! an optional transaction id, and serializes to the fixed-layout wire frame
//! used by the cross-process transport (see [`Message::to_wire`] /
//! [`Message::from_wire`]).
//!
//! ## Ownership, without a runtime refcount
//!
//! The original framework reference-counts `Message` because, in C, the same
//! object can conceivably be reached from two places at once (a transmit
//! queue entry and an application-held pointer) unless the caller is
//! careful. In Rust we get the stronger guarantee — a `Message` has exactly
//! one owner at all times, moved between the transmit queue, the
//! pending-transaction table and application code — for free from the type
//! system, so there is no `add_ref` here: dropping the last owner (or
//! calling [`Message::release`], provided for readability at call sites that
//! mirror the original API) is the only "release" there is, and it closes
//! any still-attached fd via `OwnedFd`'s own `Drop`.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::ids::{SessionId, TransactionId};
use crate::protocol::Protocol;

/// Size, in bytes, of the fixed wire header (just the transaction id).
pub const WIRE_HEADER_LEN: usize = 4;

/// A payload buffer plus optional fd and optional transaction id.
pub struct Message {
    protocol: Protocol,
    payload: Vec<u8>,
    fd: Option<OwnedFd>,
    transaction_id: Option<TransactionId>,
    session: Option<SessionId>,
}

impl Message {
    pub(crate) fn new(protocol: Protocol, payload: Vec<u8>) -> Self {
        Self {
            protocol,
            payload,
            fd: None,
            transaction_id: None,
            session: None,
        }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Stable read-only view of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Stable mutable view of the payload, capacity fixed at the protocol's
    /// `max_payload`.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Payload capacity, always equal to `self.protocol().max_payload()`.
    pub fn payload_capacity(&self) -> usize {
        self.payload.len()
    }

    /// Attach a file descriptor to this message.
    ///
    /// # Panics
    ///
    /// Panics if a fd is already attached — replacing one is a programming
    /// error in the original framework and stays one here, since silently
    /// dropping the first fd would leak it.
    pub fn set_fd(&mut self, fd: OwnedFd) {
        assert!(
            self.fd.is_none(),
            "Message::set_fd called twice on the same message"
        );
        self.fd = Some(fd);
    }

    /// Remove and return the attached fd, if any. Idempotent: a second call
    /// returns `None`.
    pub fn take_fd(&mut self) -> Option<OwnedFd> {
        self.fd.take()
    }

    /// Peek the attached fd's raw value without transferring ownership.
    pub fn peek_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub(crate) fn set_transaction_id(&mut self, id: Option<TransactionId>) {
        self.transaction_id = id;
    }

    pub fn session_of(&self) -> Option<SessionId> {
        self.session
    }

    pub(crate) fn set_session(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    /// Explicit release, provided for call sites that want to mirror the
    /// original API. Equivalent to `drop(message)`.
    pub fn release(self) {
        drop(self);
    }

    /// Encode the transaction-id header + payload into a single wire frame.
    /// The caller sends any attached fd as a separate ancillary `SCM_RIGHTS`
    /// message alongside this buffer.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(WIRE_HEADER_LEN + self.payload.len());
        let txn = self.transaction_id.map(TransactionId::get).unwrap_or(0);
        frame.extend_from_slice(&txn.to_ne_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Decode a wire frame into a freshly allocated message from `protocol`'s
    /// pool. `frame` must be exactly `WIRE_HEADER_LEN + protocol.max_payload()`
    /// bytes, matching what the sender produced with the same protocol.
    pub fn from_wire(protocol: &Protocol, frame: &[u8]) -> Option<Self> {
        if frame.len() != WIRE_HEADER_LEN + protocol.max_payload() {
            return None;
        }
        let mut txn_bytes = [0u8; WIRE_HEADER_LEN];
        txn_bytes.copy_from_slice(&frame[..WIRE_HEADER_LEN]);
        let txn = u32::from_ne_bytes(txn_bytes);

        let mut message = protocol.alloc_message();
        message.payload.copy_from_slice(&frame[WIRE_HEADER_LEN..]);
        message.transaction_id = std::num::NonZeroU32::new(txn).map(TransactionId);
        Some(message)
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.protocol.recycle(std::mem::take(&mut self.payload));
        // `self.fd`, if still set, closes itself via `OwnedFd`'s `Drop`.
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("protocol", &self.protocol.id())
            .field("len", &self.payload.len())
            .field("fd", &self.fd.as_ref().map(AsRawFd::as_raw_fd))
            .field("transaction_id", &self.transaction_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolRegistry;

    fn protocol() -> Protocol {
        ProtocolRegistry::global().get("message-tests.v1", 16)
    }

    #[test]
    fn wire_round_trip_preserves_payload_and_transaction_id() {
        let protocol = protocol();
        let mut msg = protocol.alloc_message();
        msg.payload_mut().copy_from_slice(&[7u8; 16]);
        msg.set_transaction_id(std::num::NonZeroU32::new(42).map(TransactionId));

        let frame = msg.to_wire();
        let decoded = Message::from_wire(&protocol, &frame).unwrap();
        assert_eq!(decoded.payload(), &[7u8; 16]);
        assert_eq!(decoded.transaction_id().unwrap().get(), 42);
    }

    #[test]
    fn from_wire_rejects_wrong_length() {
        let protocol = protocol();
        assert!(Message::from_wire(&protocol, &[0u8; 4]).is_none());
    }

    #[test]
    #[should_panic(expected = "twice")]
    fn double_set_fd_is_fatal() {
        let protocol = protocol();
        let mut msg = protocol.alloc_message();
        let fd_a: OwnedFd = std::fs::File::open("/dev/null").unwrap().into();
        let fd_b: OwnedFd = std::fs::File::open("/dev/null").unwrap().into();
        msg.set_fd(fd_a);
        msg.set_fd(fd_b);
    }

    #[test]
    fn take_fd_is_idempotent() {
        let protocol = protocol();
        let mut msg = protocol.alloc_message();
        assert!(msg.take_fd().is_none());
    }
}
