//! Confirms a passed file descriptor actually works on the receiving side
//! once a `Message` carrying it crosses a real session — not just that it
//! can be attached/detached in memory (see `src/message.rs`'s unit tests),
//! but that the kernel's `SCM_RIGHTS` duplicate is a live, usable endpoint.

use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use tokio::sync::mpsc;

use legato_ipc::broker::client::{advertise, connect};
use legato_ipc::broker::Broker;
use legato_ipc::protocol::ProtocolRegistry;
use legato_ipc::session::Handlers;

fn socket_paths() -> (std::path::PathBuf, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("legato-ipc-fd-test-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    (dir.join("offers.sock"), dir.join("opens.sock"))
}

#[tokio::test]
async fn a_passed_fd_is_a_live_duplicate_on_the_receiving_side() {
    let (offers_path, opens_path) = socket_paths();
    let broker = Broker::new();
    let broker_run = broker.clone();
    let offers_for_run = offers_path.clone();
    let opens_for_run = opens_path.clone();
    tokio::spawn(async move {
        let _ = broker_run.run(&offers_for_run, &opens_for_run).await;
    });
    broker.ready().await;

    let protocol = ProtocolRegistry::global().get("integration.fd-transfer.v1", 32);

    let (fd_tx, mut fd_rx) = mpsc::unbounded_channel::<OwnedFd>();
    let server_handlers = Handlers {
        on_receive: Some(Arc::new(move |_handle, mut request| {
            let fd_tx = fd_tx.clone();
            Box::pin(async move {
                if let Some(fd) = request.take_fd() {
                    let _ = fd_tx.send(fd);
                }
            })
        })),
        ..Default::default()
    };
    let _advertisement = advertise(&offers_path, protocol.clone(), "fd-echo", server_handlers)
        .await
        .expect("advertise");

    let client = connect(&opens_path, protocol.clone(), "fd-echo", Handlers::default())
        .await
        .expect("open");

    let (sent, kept) = UnixStream::pair().expect("socketpair");
    let sent_fd: OwnedFd = sent.into();

    let mut message = protocol.alloc_message();
    message.payload_mut()[0] = 7;
    message.set_fd(sent_fd);
    client.send(message).expect("send with fd");

    let received_fd = fd_rx.recv().await.expect("server should receive a passed fd");

    tokio::task::spawn_blocking(move || {
        let mut kept = kept;
        let mut received = UnixStream::from(received_fd);
        kept.write_all(b"ping").expect("write through the fd kept on the client side");

        let mut buf = [0u8; 4];
        received
            .read_exact(&mut buf)
            .expect("read through the fd passed to the server");
        assert_eq!(&buf, b"ping");
    })
    .await
    .expect("blocking check panicked");
}
