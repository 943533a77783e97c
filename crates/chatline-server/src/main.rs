//! Chatline server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on all interfaces, default port 1733
//! chatline-server
//!
//! # Loopback only, custom port, verbose logs
//! chatline-server --bind 127.0.0.1 --port 9000 --log-level debug
//! ```

use std::{net::IpAddr, thread};

use chatline_proto::{DEFAULT_PORT, MAX_LINE_LEN, OfflineNotice};
use chatline_server::{Server, ServerConfig, ShutdownHandle};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatline relay server
#[derive(Parser, Debug)]
#[command(name = "chatline-server")]
#[command(about = "Line-oriented TCP chat relay")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind to (default: all interfaces, IPv6 and IPv4)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Maximum command line length in bytes, newline included
    #[arg(long, default_value_t = MAX_LINE_LEN)]
    max_line: usize,

    /// Tell senders that messages to off-line users were dropped
    #[arg(long)]
    undelivered_wording: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerConfig {
        port: args.port,
        bind: args.bind,
        max_line_len: args.max_line,
        offline_notice: if args.undelivered_wording {
            OfflineNotice::Undelivered
        } else {
            OfflineNotice::Deferred
        },
        ..ServerConfig::default()
    };

    tracing::info!("Chatline server starting");

    let server = Server::bind(&config)?;
    spawn_ctrl_c(server.shutdown_handle())?;

    server.run()?;

    tracing::info!("Chatline server stopped");
    Ok(())
}

/// Trigger `handle` on Ctrl-C from a helper thread.
fn spawn_ctrl_c(handle: ShutdownHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    thread::Builder::new().name("ctrl-c".into()).spawn(move || {
        runtime.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Interrupt received");
                    if let Err(e) = handle.shutdown() {
                        tracing::error!("Failed to wake server: {}", e);
                    }
                },
                Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
            }
        });
    })?;

    Ok(())
}
