//! # Command-Line Interface Module
//!
//! Argument parsing for this crate's two binaries, using `clap`'s derive API:
//! `legato-broker` runs the directory broker as a standalone daemon, and
//! `legato-demo` exercises the session engine end to end as either side of
//! an interface.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, Subcommand,
};
use std::path::PathBuf;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// The directory broker: binds the offers and opens rendezvous sockets and
/// forwards accepted connections between advertising servers and opening
/// clients.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, styles = styles())]
pub struct BrokerArgs {
    /// Path to the offers rendezvous socket (servers advertise here).
    #[arg(long, env = "LEGATO_IPC_OFFERS_SOCKET", default_value = "/tmp/legato-ipc/offers.sock")]
    pub offers_socket: PathBuf,

    /// Path to the opens rendezvous socket (clients open interfaces here).
    #[arg(long, env = "LEGATO_IPC_OPENS_SOCKET", default_value = "/tmp/legato-ipc/opens.sock")]
    pub opens_socket: PathBuf,

    /// Write a single byte to this fd once both sockets are bound and
    /// accepting, then close it. Lets a supervising process block on
    /// readiness without polling.
    #[arg(long)]
    pub ready_fd: Option<i32>,

    /// Optional JSON config file (see `legato_ipc::config::Config`). When
    /// given, its socket paths and watchdog timeouts take precedence over
    /// the flags/environment above.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory to additionally write rotated log files to, on top of the
    /// colorized stdout output.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

/// A small client/server exerciser for the session engine, useful for
/// manual testing and as a worked example of the public API.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, styles = styles())]
pub struct DemoArgs {
    #[command(subcommand)]
    pub command: DemoCommand,

    /// Path to the opens rendezvous socket.
    #[arg(long, env = "LEGATO_IPC_OPENS_SOCKET", default_value = "/tmp/legato-ipc/opens.sock")]
    pub opens_socket: PathBuf,

    /// Path to the offers rendezvous socket.
    #[arg(long, env = "LEGATO_IPC_OFFERS_SOCKET", default_value = "/tmp/legato-ipc/offers.sock")]
    pub offers_socket: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DemoCommand {
    /// Advertise an interface and echo back every request it receives.
    Serve {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        instance: String,
        #[arg(long, default_value_t = 256)]
        max_payload: usize,
    },
    /// Open an interface and send one request, printing the response.
    Call {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        instance: String,
        #[arg(long, default_value_t = 256)]
        max_payload: usize,
        /// Request payload, as a hex string (e.g. `deadbeef`).
        #[arg(long, default_value = "")]
        payload: String,
    },
}
