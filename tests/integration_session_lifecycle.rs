//! Session lifecycle behavior that doesn't need the broker at all: the
//! local fast path lets these run without touching the filesystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use legato_ipc::protocol::ProtocolRegistry;
use legato_ipc::session::transport::LocalTransport;
use legato_ipc::session::{spawn_open, Handlers, Role};

fn protocol() -> legato_ipc::Protocol {
    ProtocolRegistry::global().get("lifecycle-tests.v1", 16)
}

#[tokio::test]
async fn on_close_fires_when_peer_goes_away() {
    let (client_t, server_t) = LocalTransport::pair();
    let closed = Arc::new(AtomicBool::new(false));
    let closed_clone = closed.clone();

    let client_handlers = Handlers {
        on_close: Some(Arc::new(move |_handle| {
            let closed = closed_clone.clone();
            Box::pin(async move {
                closed.store(true, Ordering::SeqCst);
            })
        })),
        ..Default::default()
    };

    let server = spawn_open(Role::Server, server_t, Handlers::default());
    let _client = spawn_open(Role::Client, client_t, client_handlers);

    server.close();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn many_one_way_messages_arrive_in_order() {
    let (client_t, server_t) = LocalTransport::pair();
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = received.clone();

    let server_handlers = Handlers {
        on_receive: Some(Arc::new(move |_handle, msg| {
            let received = received_clone.clone();
            Box::pin(async move {
                received.lock().unwrap().push(msg.payload()[0]);
            })
        })),
        ..Default::default()
    };
    spawn_open(Role::Server, server_t, server_handlers);
    let client = spawn_open(Role::Client, client_t, Handlers::default());

    let protocol = protocol();
    for i in 0..20u8 {
        let mut msg = protocol.alloc_message();
        msg.payload_mut()[0] = i;
        client.send(msg).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(received.lock().unwrap().as_slice(), &(0..20).collect::<Vec<_>>()[..]);
}

#[tokio::test]
async fn respond_after_peer_closed_is_silently_discarded() {
    let (client_t, server_t) = LocalTransport::pair();
    let protocol = protocol();
    let server = spawn_open(Role::Server, server_t, Handlers::default());
    drop(client_t); // simulate the peer vanishing without a session wrapper

    let request = protocol.alloc_message();
    let response = protocol.alloc_message();
    // Should not panic even though the peer side was never wrapped in a session.
    server.respond(request, response);
}
