//! Session Engine (C3).
//!
//! Each [`Session`] is a dedicated tokio task (an actor) owning one
//! [`transport::Transport`] and a small command inbox. This is the direct
//! translation of the original framework's "every session is serviced by
//! exactly one owning thread" rule: instead of asserting thread identity on
//! every call, the compiler enforces it — the only way to touch a session's
//! state is to send its actor a [`Command`], and the actor is the only task
//! that ever runs the peer's `on_open`/`on_receive`/`on_close` handlers.
//!
//! Requests are correlated by [`TransactionId`] in a per-session pending
//! table, exactly like the original's transaction list, except the
//! "callback" side is an idiomatic `FnOnce(Option<Message>)` closure rather
//! than a C function pointer plus an opaque context pointer — the closure's
//! own captures are the context, so the pending entry does not need to hand
//! the original request back out: for the local fast path, the request
//! object has in the meantime physically moved to the peer, so there isn't
//! one to hand back.

pub mod transport;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{IpcError, Result};
use crate::ids::{SessionId, TransactionId};
use crate::message::Message;
use transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Open,
    Closed,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked once the session transitions to OPEN (client-side only — server
/// sessions are already OPEN when handed to the application).
pub type OpenHandler = Arc<dyn Fn(SessionHandle, Result<()>) -> BoxFuture + Send + Sync>;
/// Invoked once, when the session closes for any reason.
pub type CloseHandler = Arc<dyn Fn(SessionHandle) -> BoxFuture + Send + Sync>;
/// Invoked for every inbound message that is not a response to a pending
/// request (one-way messages and incoming requests alike).
pub type ReceiveHandler = Arc<dyn Fn(SessionHandle, Message) -> BoxFuture + Send + Sync>;
/// Completion callback for an async `request`.
pub type RequestCallback = Box<dyn FnOnce(Option<Message>) + Send>;

#[derive(Clone, Default)]
pub struct Handlers {
    pub on_open: Option<OpenHandler>,
    pub on_close: Option<CloseHandler>,
    pub on_receive: Option<ReceiveHandler>,
}

enum PendingEntry {
    Async(RequestCallback),
    Sync(oneshot::Sender<Option<Message>>),
}

enum Command {
    Send(Message),
    Request(Message, PendingEntry),
    Close,
}

/// A cheaply-`Clone`-able reference to a running session. All mutating
/// operations are fire-and-forget sends into the owning task's command
/// channel; the only thing that blocks is [`SessionHandle::request_sync`].
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    cmd_tx: mpsc::UnboundedSender<Command>,
    txn_counter: Arc<AtomicU32>,
    busy: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn next_transaction_id(&self) -> TransactionId {
        loop {
            let v = self.txn_counter.fetch_add(1, Ordering::Relaxed);
            if let Some(nz) = std::num::NonZeroU32::new(v) {
                return TransactionId(nz);
            }
        }
    }

    /// Send a one-way message: no response is expected, no transaction id
    /// is attached.
    pub fn send(&self, mut message: Message) -> Result<()> {
        message.set_transaction_id(None);
        self.cmd_tx
            .send(Command::Send(message))
            .map_err(|_| IpcError::Closed)
    }

    /// Send a request and invoke `callback` from the session's own task
    /// once the response arrives (or the session closes first, in which
    /// case the callback runs with `None`).
    pub fn request(
        &self,
        mut message: Message,
        callback: impl FnOnce(Option<Message>) + Send + 'static,
    ) -> Result<()> {
        let txn = self.next_transaction_id();
        message.set_transaction_id(Some(txn));
        self.cmd_tx
            .send(Command::Request(message, PendingEntry::Async(Box::new(callback))))
            .map_err(|_| IpcError::Closed)
    }

    /// Send a request and suspend until the response arrives.
    ///
    /// Returns `None` immediately, without sending anything, if called
    /// re-entrantly from within this same session's own `on_receive`
    /// handler — the original framework deadlocks here because its
    /// client thread is the one blocked waiting; this redesign instead
    /// detects the re-entrant call and fails it the way a non-blocking
    /// attempt would, since the actor task that would have to drive the
    /// round trip is the same task making the call.
    pub async fn request_sync(&self, mut message: Message) -> Option<Message> {
        if self.busy.load(Ordering::SeqCst) {
            return None;
        }
        let txn = self.next_transaction_id();
        message.set_transaction_id(Some(txn));
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Request(message, PendingEntry::Sync(tx)))
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Reply to a previously received request, copying its transaction id.
    /// The request is released (dropped) here. If the session has already
    /// closed, the response is silently discarded, matching the original
    /// framework's "responding on a dead session is not an error" rule.
    pub fn respond(&self, request: Message, mut response: Message) {
        response.set_transaction_id(request.transaction_id());
        drop(request);
        let _ = self.cmd_tx.send(Command::Send(response));
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

struct SessionActor<T: Transport> {
    id: SessionId,
    role: Role,
    transport: T,
    handlers: Handlers,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: HashMap<TransactionId, PendingEntry>,
    busy: Arc<AtomicBool>,
    state: SessionState,
}

impl<T: Transport + 'static> SessionActor<T> {
    async fn run_handler(&self, fut: BoxFuture) {
        self.busy.store(true, Ordering::SeqCst);
        fut.await;
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn handle_incoming(&mut self, handle: &SessionHandle, message: Message) {
        if let Some(txn) = message.transaction_id() {
            if let Some(entry) = self.pending.remove(&txn) {
                match entry {
                    PendingEntry::Async(cb) => cb(Some(message)),
                    PendingEntry::Sync(tx) => {
                        let _ = tx.send(Some(message));
                    }
                }
                return;
            }
        }
        if let Some(on_receive) = self.handlers.on_receive.clone() {
            let fut = on_receive(handle.clone(), message);
            self.run_handler(fut).await;
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> std::ops::ControlFlow<()> {
        match cmd {
            Command::Send(message) => {
                if let Err(e) = self.transport.send(message).await {
                    tracing::debug!(session = %self.id, error = %e, "send failed, closing session");
                    return std::ops::ControlFlow::Break(());
                }
            }
            Command::Request(message, entry) => {
                let txn = message
                    .transaction_id()
                    .expect("caller always attaches a transaction id to a request");
                self.pending.insert(txn, entry);
                if let Err(e) = self.transport.send(message).await {
                    tracing::debug!(session = %self.id, error = %e, "send failed, closing session");
                    if let Some(entry) = self.pending.remove(&txn) {
                        Self::fail_pending(entry);
                    }
                    return std::ops::ControlFlow::Break(());
                }
            }
            Command::Close => return std::ops::ControlFlow::Break(()),
        }
        std::ops::ControlFlow::Continue(())
    }

    fn fail_pending(entry: PendingEntry) {
        match entry {
            PendingEntry::Async(cb) => cb(None),
            PendingEntry::Sync(tx) => {
                let _ = tx.send(None);
            }
        }
    }

    async fn drain_remaining_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            if let Command::Request(_, entry) = cmd {
                Self::fail_pending(entry);
            }
        }
        for (_, entry) in self.pending.drain() {
            Self::fail_pending(entry);
        }
    }

    async fn run(mut self, handle: SessionHandle, opened_tx: Option<oneshot::Sender<Result<()>>>) {
        tracing::debug!(session = %self.id, role = ?self.role, "session open");
        self.state = SessionState::Open;
        if let Some(tx) = opened_tx {
            let _ = tx.send(Ok(()));
        }
        if let Some(on_open) = self.handlers.on_open.clone() {
            let fut = on_open(handle.clone(), Ok(()));
            self.run_handler(fut).await;
        }

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd).await.is_break() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                frame = self.transport.recv() => {
                    match frame {
                        Ok(Some(message)) => self.handle_incoming(&handle, message).await,
                        Ok(None) => {
                            tracing::debug!(session = %self.id, "peer closed");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(session = %self.id, error = %e, "recv failed, closing session");
                            break;
                        }
                    }
                }
            }
        }

        self.state = SessionState::Closed;
        self.drain_remaining_commands().await;
        if let Some(on_close) = self.handlers.on_close.clone() {
            let fut = on_close(handle);
            self.run_handler(fut).await;
        }
    }
}

/// Spawn a session actor that is already connected (server-side accept, or
/// a pre-built local transport pair) and therefore starts directly in the
/// OPEN state — there is no handshake phase to run.
pub fn spawn_open<T: Transport + 'static>(
    role: Role,
    transport: T,
    handlers: Handlers,
) -> SessionHandle {
    spawn_inner(role, transport, handlers, None)
}

fn spawn_inner<T: Transport + 'static>(
    role: Role,
    transport: T,
    handlers: Handlers,
    opened_tx: Option<oneshot::Sender<Result<()>>>,
) -> SessionHandle {
    static NEXT_ID: AtomicU32 = AtomicU32::new(0);
    let id = SessionId(NEXT_ID.fetch_add(1, Ordering::Relaxed) as usize);

    let (cmd_tx, commands) = mpsc::unbounded_channel();
    let busy = Arc::new(AtomicBool::new(false));
    let handle = SessionHandle {
        id,
        cmd_tx,
        txn_counter: Arc::new(AtomicU32::new(1)),
        busy: busy.clone(),
    };

    let actor = SessionActor {
        id,
        role,
        transport,
        handlers,
        commands,
        pending: HashMap::new(),
        busy,
        state: SessionState::Opening,
    };

    let task_handle = handle.clone();
    tokio::spawn(actor.run(task_handle, opened_tx));
    handle
}
