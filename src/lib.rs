//! # Legato IPC
//!
//! A typed, session-oriented interprocess messaging core: servers advertise
//! named interfaces with a directory broker, clients open them by name, and
//! the two sides exchange one-way messages and correlated request/response
//! pairs over a dedicated session — all backed by `SOCK_SEQPACKET` sockets
//! with passed file descriptors for cross-process transport, or an
//! in-memory fast path when both sides live in the same process.

pub mod atomic_file;
pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod message;
pub mod protocol;
pub mod seqpacket;
pub mod session;
pub mod watchdog;

pub use error::{IpcError, Result};
pub use message::Message;
pub use protocol::{Protocol, ProtocolRegistry};
pub use session::{Handlers, Role, SessionHandle};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
