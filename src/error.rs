//! Error taxonomy for the messaging core.
//!
//! Everything a caller can reasonably branch on (no such service, duplicate
//! advertise, peer closed, ...) is a variant of [`IpcError`]. Invariant
//! violations — a double `set_fd`, a thread-affinity breach, a protocol
//! re-registered with a different `max_payload` — are programming errors and
//! are raised with `panic!`, never encoded as a `Result`, matching the
//! fatal/`LE_ASSERT` semantics of the original framework.

use std::io;

/// Errors surfaced by the protocol registry, session engine and broker.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// No server is currently advertising the requested `(protocol, instance)`.
    #[error("no service advertised for {protocol}/{instance}")]
    NotFound { protocol: String, instance: String },

    /// Access denied, or the operation is illegal in the session's current state.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// A server advertised `(protocol, instance)` while another server still holds it.
    #[error("{protocol}/{instance} is already advertised")]
    Duplicate { protocol: String, instance: String },

    /// A non-blocking send or receive made no progress.
    #[error("operation would block")]
    WouldBlock,

    /// The peer closed the session.
    #[error("session closed")]
    Closed,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    CommError(#[source] io::Error),

    /// A caller-configured timeout elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// An invariant was violated or an OS call failed unexpectedly.
    #[error("fault: {0}")]
    Fault(String),
}

impl From<io::Error> for IpcError {
    fn from(e: io::Error) -> Self {
        IpcError::CommError(e)
    }
}

impl From<nix::Error> for IpcError {
    fn from(e: nix::Error) -> Self {
        IpcError::CommError(io::Error::from(e))
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;
