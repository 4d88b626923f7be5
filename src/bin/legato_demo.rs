//! A small client/server exerciser for the session engine.

use std::sync::Arc;

use clap::Parser;
use legato_ipc::broker::client::{advertise, connect};
use legato_ipc::cli::{DemoArgs, DemoCommand};
use legato_ipc::protocol::ProtocolRegistry;
use legato_ipc::session::Handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    let _log_guard = legato_ipc::logging::init(None);

    match args.command {
        DemoCommand::Serve {
            protocol,
            instance,
            max_payload,
        } => serve(&args.offers_socket, &protocol, &instance, max_payload).await,
        DemoCommand::Call {
            protocol,
            instance,
            max_payload,
            payload,
        } => call(&args.opens_socket, &protocol, &instance, max_payload, &payload).await,
    }
}

async fn serve(
    offers_socket: &std::path::Path,
    protocol_id: &str,
    instance: &str,
    max_payload: usize,
) -> anyhow::Result<()> {
    let protocol = ProtocolRegistry::global().get(protocol_id, max_payload);

    let handlers = Handlers {
        on_receive: Some(Arc::new(move |handle, request| {
            Box::pin(async move {
                let mut response = request.protocol().alloc_message();
                let n = request.payload().len();
                response.payload_mut()[..n].copy_from_slice(request.payload());
                tracing::info!(bytes = n, "echoing request");
                handle.respond(request, response);
            })
        })),
        ..Default::default()
    };

    let advertisement = advertise(offers_socket, protocol, instance, handlers).await?;
    tracing::info!(protocol = protocol_id, instance, "advertised, serving forever");
    tokio::signal::ctrl_c().await?;
    advertisement.withdraw();
    Ok(())
}

async fn call(
    opens_socket: &std::path::Path,
    protocol_id: &str,
    instance: &str,
    max_payload: usize,
    payload_hex: &str,
) -> anyhow::Result<()> {
    let protocol = ProtocolRegistry::global().get(protocol_id, max_payload);
    let payload = hex_decode(payload_hex)?;
    if payload.len() > max_payload {
        anyhow::bail!("payload ({} bytes) exceeds max_payload ({max_payload})", payload.len());
    }

    let session = connect(opens_socket, protocol.clone(), instance, Handlers::default()).await?;

    let mut request = protocol.alloc_message();
    request.payload_mut()[..payload.len()].copy_from_slice(&payload);

    let response = session
        .request_sync(request)
        .await
        .ok_or_else(|| anyhow::anyhow!("no response (session closed)"))?;
    println!("{}", hex_encode(response.payload()));
    Ok(())
}

fn hex_decode(s: &str) -> anyhow::Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        anyhow::bail!("hex payload must have an even number of digits");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(anyhow::Error::from))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
