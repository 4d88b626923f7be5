//! The two transports a [`super::Session`] can run over: a real
//! `SOCK_SEQPACKET` connection for cross-process sessions, and a pair of
//! in-memory channels for same-process sessions (the "local fast path").

use async_trait::async_trait;

use crate::error::{IpcError, Result};
use crate::message::{Message, WIRE_HEADER_LEN};
use crate::protocol::Protocol;
use crate::seqpacket::SeqPacketConn;

/// What a [`super::Session`] actor sends and receives [`Message`]s over.
///
/// `send` takes the message by value: once it returns, ownership has either
/// gone out over the wire (and the local copy is free to drop) or, for the
/// local transport, moved bodily into the peer's inbox. Either way the
/// caller never gets it back — the request/response correlation table keys
/// on the transaction id, not on retaining the original object.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: Message) -> Result<()>;

    /// `Ok(None)` means the peer closed its end cleanly.
    async fn recv(&mut self) -> Result<Option<Message>>;
}

/// Cross-process transport: one connected `SOCK_SEQPACKET` socket plus the
/// protocol used to decode (and pool-allocate) incoming frames.
pub struct UnixTransport {
    conn: SeqPacketConn,
    protocol: Protocol,
}

impl UnixTransport {
    pub fn new(conn: SeqPacketConn, protocol: Protocol) -> Self {
        Self { conn, protocol }
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn send(&mut self, message: Message) -> Result<()> {
        let frame = message.to_wire();
        self.conn.send(&frame, message.peek_fd()).await?;
        Ok(())
        // `message` drops here; the fd (if any) closes our copy, the kernel
        // having already handed the peer its own dup'd descriptor.
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        let max_len = WIRE_HEADER_LEN + self.protocol.max_payload();
        match self.conn.recv(max_len).await? {
            None => Ok(None),
            Some((bytes, fd)) => {
                let mut message = Message::from_wire(&self.protocol, &bytes)
                    .ok_or_else(|| IpcError::Fault("peer sent a malformed frame".into()))?;
                if let Some(fd) = fd {
                    message.set_fd(fd);
                }
                Ok(Some(message))
            }
        }
    }
}

/// Same-process transport: messages move directly between two tasks over
/// unbounded channels, never touching the wire format at all.
pub struct LocalTransport {
    outbox: tokio::sync::mpsc::UnboundedSender<Message>,
    inbox: tokio::sync::mpsc::UnboundedReceiver<Message>,
}

impl LocalTransport {
    /// Build both ends of a local session at once.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, rx_b) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                outbox: tx_a,
                inbox: rx_b,
            },
            Self {
                outbox: tx_b,
                inbox: rx_a,
            },
        )
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&mut self, message: Message) -> Result<()> {
        self.outbox.send(message).map_err(|_| IpcError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.inbox.recv().await)
    }
}
