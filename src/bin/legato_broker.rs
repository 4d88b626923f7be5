//! The directory broker, run as a standalone daemon.

use std::os::fd::{FromRawFd, OwnedFd};

use clap::Parser;
use legato_ipc::broker::Broker;
use legato_ipc::cli::BrokerArgs;
use legato_ipc::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = BrokerArgs::parse();
    let _log_guard = legato_ipc::logging::init(args.log_dir.as_deref());

    let (offers_socket, opens_socket) = match &args.config {
        Some(path) => {
            let config = Config::load(path)?;
            (config.offers_socket, config.opens_socket)
        }
        None => (args.offers_socket.clone(), args.opens_socket.clone()),
    };

    if let Some(dir) = offers_socket.parent() {
        std::fs::create_dir_all(dir)?;
    }
    if let Some(dir) = opens_socket.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let broker = Broker::new();

    if let Some(fd) = args.ready_fd {
        let broker = broker.clone();
        tokio::spawn(async move {
            broker.ready().await;
            // SAFETY: `fd` is a file descriptor handed to us by a supervising
            // process specifically to be written to and closed once ready.
            use std::io::Write;
            let mut file = unsafe { std::fs::File::from(OwnedFd::from_raw_fd(fd)) };
            let _ = file.write_all(&[1]);
        });
    }

    tracing::info!(
        offers = %offers_socket.display(),
        opens = %opens_socket.display(),
        "starting broker"
    );
    broker.run(&offers_socket, &opens_socket).await?;
    Ok(())
}
