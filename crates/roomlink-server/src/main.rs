//! roomlink server binary.
//!
//! # Usage
//!
//! ```bash
//! # Accept any correctly signed opening header
//! roomlink-server --bind 0.0.0.0:1999
//!
//! # Only let known initiators open rooms
//! roomlink-server --trusted-key 3b6a27bc...f1d2 --trusted-key 9e0c...
//! ```

use std::time::Duration;

use clap::Parser;
use roomlink_server::{RoomConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// roomlink pairing server
#[derive(Parser, Debug)]
#[command(name = "roomlink-server")]
#[command(about = "Rendezvous server for code-based device pairing")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:1999")]
    bind: String,

    /// Seconds an empty room survives without traffic
    #[arg(long, default_value = "300")]
    idle_timeout_secs: u64,

    /// Largest accepted request body in bytes
    #[arg(long, default_value = "65536")]
    max_body_bytes: usize,

    /// Hex-encoded Ed25519 public key allowed to open rooms (repeatable)
    #[arg(long = "trusted-key")]
    trusted_keys: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("roomlink server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.trusted_keys.is_empty() {
        tracing::warn!("No trusted keys configured - any signed header may open a room");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        room: RoomConfig {
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            max_body_bytes: args.max_body_bytes,
        },
        trusted_keys: args.trusted_keys,
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}
