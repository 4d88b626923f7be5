//! Protocol Registry (C1).
//!
//! A [`Protocol`] is an interned `(id, max_payload)` pair plus the message
//! pool backing it. Protocols are process-wide, created lazily on first
//! reference and never destroyed — exactly the lifetime the original
//! framework gives `messagingProtocol`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::message::Message;

/// Maximum length of a protocol id string, matching the 127-byte limit
/// (128 bytes on the wire, NUL-padded) carried by the offer/open record.
pub const MAX_PROTOCOL_ID_LEN: usize = 127;

struct ProtocolInner {
    id: String,
    max_payload: usize,
    pool: SegQueue<Vec<u8>>,
}

/// An interned protocol descriptor.
///
/// Cloning a `Protocol` is cheap (an `Arc` bump); every clone obtained via
/// [`ProtocolRegistry::get`] for the same id refers to the same pool.
#[derive(Clone)]
pub struct Protocol(Arc<ProtocolInner>);

impl Protocol {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn max_payload(&self) -> usize {
        self.0.max_payload
    }

    /// Allocate a zero-initialized message from this protocol's pool.
    ///
    /// Reuses a previously released payload buffer when one is available,
    /// so the pool stays contention-free in steady state once warmed up.
    pub fn alloc_message(&self) -> Message {
        let mut payload = self.0.pool.pop().unwrap_or_default();
        payload.clear();
        payload.resize(self.0.max_payload, 0);
        Message::new(self.clone(), payload)
    }

    /// Return a payload buffer to the pool. Called from `Message`'s drop path.
    pub(crate) fn recycle(&self, payload: Vec<u8>) {
        // Bound the pool so a burst of large allocations doesn't pin memory
        // forever; a handful of spares is enough to avoid reallocating in
        // the steady state.
        if self.0.pool.len() < 64 {
            self.0.pool.push(payload);
        }
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.0.id)
            .field("max_payload", &self.0.max_payload)
            .finish()
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Process-wide table of interned protocols.
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: Mutex<HashMap<String, Protocol>>,
}

impl ProtocolRegistry {
    fn new() -> Self {
        Self {
            protocols: Mutex::new(HashMap::new()),
        }
    }

    /// The single process-wide registry.
    pub fn global() -> &'static ProtocolRegistry {
        static REGISTRY: OnceLock<ProtocolRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ProtocolRegistry::new)
    }

    /// Intern a protocol, or return the existing one.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered with a different `max_payload`.
    /// This mirrors the C implementation's fatal assertion: silently
    /// tolerating a mismatched re-registration would let one component read
    /// or write past another's buffer.
    pub fn get(&self, id: &str, max_payload: usize) -> Protocol {
        assert!(
            id.len() <= MAX_PROTOCOL_ID_LEN,
            "protocol id {id:?} exceeds {MAX_PROTOCOL_ID_LEN} bytes"
        );

        let mut protocols = self.protocols.lock();
        if let Some(existing) = protocols.get(id) {
            assert_eq!(
                existing.max_payload(),
                max_payload,
                "protocol {id:?} re-registered with max_payload {} but was already {}",
                max_payload,
                existing.max_payload()
            );
            return existing.clone();
        }

        let protocol = Protocol(Arc::new(ProtocolInner {
            id: id.to_string(),
            max_payload,
            pool: SegQueue::new(),
        }));
        protocols.insert(id.to_string(), protocol.clone());
        protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_same_descriptor() {
        let registry = ProtocolRegistry::new();
        let a = registry.get("echo.v1", 64);
        let b = registry.get("echo.v1", 64);
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "re-registered")]
    fn mismatched_max_payload_is_fatal() {
        let registry = ProtocolRegistry::new();
        registry.get("echo.v1", 64);
        registry.get("echo.v1", 128);
    }

    #[test]
    fn alloc_message_has_protocol_capacity() {
        let registry = ProtocolRegistry::new();
        let protocol = registry.get("echo.v1", 64);
        let msg = protocol.alloc_message();
        assert_eq!(msg.payload().len(), 64);
    }
}
