//! Watchdog.
//!
//! Each client process registers a kick interval (or disables monitoring
//! entirely) and then calls [`Watchdog::kick`] periodically; if two kick
//! intervals pass without a kick, the watchdog reports the client as
//! expired on its `expired` channel rather than killing anything itself —
//! supervising what happens next is the caller's job, same as in the
//! original framework where the watchdog only ever notifies the supervisor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A client's configured timeout. Mirrors the original framework's two
/// special values alongside an ordinary duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Disable monitoring for this client.
    Never,
    /// Expire on the very next check, regardless of when the client last kicked.
    Now,
    After(Duration),
}

/// Used when a client has no per-process or per-app configured timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

/// Reported once a client's timeout has elapsed twice over without a kick
/// being observed (or immediately, for [`Timeout::Now`]).
#[derive(Debug, Clone)]
pub struct Expiry {
    pub client: ClientId,
    pub app_id: String,
    pub pid: u32,
    pub at: Instant,
}

struct Client {
    app_id: String,
    pid: u32,
    timeout: Timeout,
    last_kick: Instant,
    missed: u32,
}

/// A timer per monitored client, checked on a fixed tick. Timeout
/// precedence is per-process override, then per-app default, then
/// [`DEFAULT_TIMEOUT`].
pub struct Watchdog {
    clients: Arc<Mutex<HashMap<ClientId, Client>>>,
    app_defaults: Arc<Mutex<HashMap<String, Duration>>>,
    expired_tx: mpsc::UnboundedSender<Expiry>,
}

impl Watchdog {
    /// Returns the watchdog plus the receiving end of its expiry channel.
    /// Callers `tokio::spawn` [`Watchdog::run`] separately so the ticking
    /// loop and the reporting channel are owned independently.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Self {
                clients: Arc::new(Mutex::new(HashMap::new())),
                app_defaults: Arc::new(Mutex::new(HashMap::new())),
                expired_tx,
            },
            expired_rx,
        )
    }

    pub fn set_app_default_timeout(&self, app_id: impl Into<String>, timeout: Duration) {
        self.app_defaults.lock().insert(app_id.into(), timeout);
    }

    /// Register (or re-register) a client.
    pub fn register(&self, client: ClientId, app_id: impl Into<String>, pid: u32, timeout: Timeout) {
        let app_id = app_id.into();
        self.clients.lock().insert(
            client,
            Client {
                app_id,
                pid,
                timeout,
                last_kick: Instant::now(),
                missed: 0,
            },
        );
    }

    pub fn unregister(&self, client: ClientId) {
        self.clients.lock().remove(&client);
    }

    /// Record a kick: resets the missed-kick count for this client.
    pub fn kick(&self, client: ClientId) {
        if let Some(c) = self.clients.lock().get_mut(&client) {
            c.last_kick = Instant::now();
            c.missed = 0;
        }
    }

    /// Change a single client's timeout without re-registering it.
    pub fn set_timeout(&self, client: ClientId, timeout: Timeout) {
        if let Some(c) = self.clients.lock().get_mut(&client) {
            c.timeout = timeout;
            c.last_kick = Instant::now();
            c.missed = 0;
        }
    }

    /// `None` here means "never expire", full stop — it must short-circuit
    /// before the app/global default fallback below, unlike an ordinary
    /// unset override.
    fn resolved_interval(&self, client: &Client) -> Option<Duration> {
        if matches!(client.timeout, Timeout::Never) {
            return None;
        }
        match client.timeout {
            Timeout::Never => None,
            Timeout::Now => Some(Duration::ZERO),
            Timeout::After(d) => Some(d),
        }
        .or_else(|| Some(self.app_defaults.lock().get(&client.app_id).copied().unwrap_or(DEFAULT_TIMEOUT)))
    }

    /// Drive the tick loop. Checks every client's deadline on a fixed
    /// cadence and reports an [`Expiry`] the first time a client crosses two
    /// missed intervals (or immediately for [`Timeout::Now`]), then stops
    /// tracking it — the caller re-registers if it wants to keep watching
    /// after handling the expiry.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let mut expired = Vec::new();
            {
                let mut clients = self.clients.lock();
                clients.retain(|&id, client| {
                    let Some(interval) = self.resolved_interval(client) else {
                        return true;
                    };
                    if now.duration_since(client.last_kick) < interval {
                        return true;
                    }
                    client.missed += 1;
                    let threshold = if interval.is_zero() { 1 } else { 2 };
                    if client.missed >= threshold {
                        expired.push(Expiry {
                            client: id,
                            app_id: client.app_id.clone(),
                            pid: client.pid,
                            at: now,
                        });
                        false
                    } else {
                        true
                    }
                });
            }
            for expiry in expired {
                tracing::warn!(client = ?expiry.client, app = %expiry.app_id, pid = expiry.pid, "watchdog expired");
                let _ = self.expired_tx.send(expiry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_two_missed_intervals() {
        let (watchdog, mut expired_rx) = Watchdog::new();
        watchdog.register(ClientId(1), "test-app", 1234, Timeout::After(Duration::from_millis(100)));
        tokio::spawn(watchdog.run());

        tokio::time::advance(Duration::from_millis(250)).await;
        let expiry = expired_rx.recv().await.unwrap();
        assert_eq!(expiry.client, ClientId(1));
        assert_eq!(expiry.pid, 1234);
    }

    #[tokio::test(start_paused = true)]
    async fn kicking_resets_the_deadline() {
        let (watchdog, mut expired_rx) = Watchdog::new();
        watchdog.register(ClientId(7), "test-app", 1, Timeout::After(Duration::from_millis(100)));
        tokio::spawn(watchdog.run());

        tokio::time::advance(Duration::from_millis(80)).await;
        watchdog.kick(ClientId(7));
        tokio::time::advance(Duration::from_millis(80)).await;
        watchdog.kick(ClientId(7));

        assert!(expired_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn never_timeout_does_not_expire() {
        let (watchdog, mut expired_rx) = Watchdog::new();
        watchdog.register(ClientId(3), "test-app", 1, Timeout::Never);
        tokio::spawn(watchdog.run());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(expired_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn now_timeout_expires_on_next_check() {
        let (watchdog, mut expired_rx) = Watchdog::new();
        watchdog.register(ClientId(9), "test-app", 1, Timeout::Now);
        tokio::spawn(watchdog.run());

        tokio::time::advance(Duration::from_millis(60)).await;
        let expiry = expired_rx.recv().await.unwrap();
        assert_eq!(expiry.client, ClientId(9));
    }
}
