//! End-to-end: a server advertises through the broker, a client opens it,
//! and the two exchange a request/response over the handed-off connection.

use std::sync::Arc;
use std::time::Duration;

use legato_ipc::broker::client::{advertise, connect};
use legato_ipc::broker::Broker;
use legato_ipc::protocol::ProtocolRegistry;
use legato_ipc::session::Handlers;

fn socket_paths() -> (std::path::PathBuf, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("legato-ipc-test-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    (dir.join("offers.sock"), dir.join("opens.sock"))
}

#[tokio::test]
async fn client_opens_what_server_advertised() {
    let (offers_path, opens_path) = socket_paths();
    let broker = Broker::new();
    let broker_run = broker.clone();
    let offers_for_run = offers_path.clone();
    let opens_for_run = opens_path.clone();
    tokio::spawn(async move {
        let _ = broker_run.run(&offers_for_run, &opens_for_run).await;
    });
    broker.ready().await;

    let protocol = ProtocolRegistry::global().get("integration.echo.v1", 32);

    let server_handlers = Handlers {
        on_receive: Some(Arc::new(|handle, request| {
            Box::pin(async move {
                let mut response = request.protocol().alloc_message();
                response.payload_mut()[0] = request.payload()[0].wrapping_add(1);
                handle.respond(request, response);
            })
        })),
        ..Default::default()
    };
    let _advertisement = advertise(&offers_path, protocol.clone(), "default", server_handlers)
        .await
        .expect("advertise");

    let client = connect(&opens_path, protocol.clone(), "default", Handlers::default())
        .await
        .expect("open");

    let mut request = protocol.alloc_message();
    request.payload_mut()[0] = 10;
    let response = client.request_sync(request).await.expect("response");
    assert_eq!(response.payload()[0], 11);
}

/// A client that opens an instance before any server advertises it is
/// parked on the broker's waiting list rather than failed outright; once a
/// matching advertise arrives, the broker drains the wait list and the
/// client's `connect()` resolves as if it had arrived after the advertise.
#[tokio::test]
async fn client_opening_before_server_advertises_still_connects() {
    let (offers_path, opens_path) = socket_paths();
    let broker = Broker::new();
    let broker_run = broker.clone();
    let offers_for_run = offers_path.clone();
    let opens_for_run = opens_path.clone();
    tokio::spawn(async move {
        let _ = broker_run.run(&offers_for_run, &opens_for_run).await;
    });
    broker.ready().await;

    let protocol = ProtocolRegistry::global().get("integration.late-start.v1", 16);

    let opens_for_client = opens_path.clone();
    let client_protocol = protocol.clone();
    let client_task = tokio::spawn(async move {
        connect(&opens_for_client, client_protocol, "latecomer", Handlers::default()).await
    });

    // Give the client's open every chance to race ahead of the advertise
    // and wrongly fail before it arrives.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let server_handlers = Handlers {
        on_receive: Some(Arc::new(|handle, request| {
            Box::pin(async move {
                let mut response = request.protocol().alloc_message();
                response.payload_mut()[0] = request.payload()[0].wrapping_add(1);
                handle.respond(request, response);
            })
        })),
        ..Default::default()
    };
    let _advertisement = advertise(&offers_path, protocol.clone(), "latecomer", server_handlers)
        .await
        .expect("advertise");

    let client = client_task
        .await
        .expect("client task panicked")
        .expect("queued open should resolve once advertised");

    let mut request = protocol.alloc_message();
    request.payload_mut()[0] = 41;
    let response = client.request_sync(request).await.expect("response");
    assert_eq!(response.payload()[0], 42);
}

#[tokio::test]
async fn withdrawing_an_advertisement_parks_new_opens_instead_of_granting_them() {
    let (offers_path, opens_path) = socket_paths();
    let broker = Broker::new();
    let broker_run = broker.clone();
    let offers_for_run = offers_path.clone();
    let opens_for_run = opens_path.clone();
    tokio::spawn(async move {
        let _ = broker_run.run(&offers_for_run, &opens_for_run).await;
    });
    broker.ready().await;

    let protocol = ProtocolRegistry::global().get("integration.withdraw.v1", 16);
    let advertisement = advertise(&offers_path, protocol.clone(), "temp", Handlers::default())
        .await
        .expect("advertise");
    advertisement.withdraw();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // No one is advertising "temp" any more, so the open is parked on the
    // wait list rather than resolved either way within this window.
    let result = tokio::time::timeout(
        Duration::from_millis(200),
        connect(&opens_path, protocol, "temp", Handlers::default()),
    )
    .await;
    assert!(result.is_err(), "open should still be waiting, not resolved");
}
