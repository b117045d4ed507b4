//! Rebound server binary.
//!
//! ```text
//!     Client                     ┌──────────────────────────────────────────────┐
//!     ──────────────────────────▶│  net         accept loops, Socket, limits    │
//!                                │    ↓                                         │
//!                                │  http        request codec, driver           │
//!                                │    ↓                                         │
//!                                │  channel     upgrade negotiation             │
//!                                │    ↓                                         │
//!                                │  websocket   parser → handler → client       │
//!     ◀──────────────────────────│    ↓         compiler, gateway (broadcast)   │
//!                                │  app         Echo | Relay                    │
//!                                │                                              │
//!                                │  config · observability · lifecycle          │
//!                                └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use rebound::app::{Echo, Relay, RequestHandler};
use rebound::config::{load_config, validate_config, ConfigError, ServerConfig};
use rebound::lifecycle::{self, wait_for_signal};
use rebound::net::Endpoint;
use rebound::observability::init_logging;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: i64 = 9000;

/// How long shutdown waits for open connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HandlerKind {
    /// Send each message back to its sender.
    Echo,
    /// Broadcast each message to every connected client.
    Relay,
}

#[derive(Debug, Parser)]
#[command(name = "rebound", version, about = "HTTP/1.1 upgrade server with a WebSocket engine")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host; replaces the configured addresses.
    #[arg(long, env = "REBOUND_SERVER_HOST")]
    host: Option<String>,

    /// Listen port; replaces the configured addresses.
    #[arg(long, env = "REBOUND_SERVER_PORT", allow_negative_numbers = true)]
    port: Option<i64>,

    /// Application handler for upgraded connections.
    #[arg(long, value_enum, default_value_t = HandlerKind::Echo)]
    handler: HandlerKind,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if cli.host.is_some() || cli.port.is_some() {
        let endpoint = Endpoint::from_parts(
            cli.host.as_deref().unwrap_or(DEFAULT_HOST),
            cli.port.unwrap_or(DEFAULT_PORT),
        )?;
        config.listener.addresses = vec![endpoint.to_string()];
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        handler = ?cli.handler,
        addresses = ?config.listener.addresses,
        max_connections = config.listener.max_connections,
        "rebound starting"
    );

    let handler_kind = cli.handler;
    let running = lifecycle::start(&config, |gateway| -> Arc<dyn RequestHandler> {
        match handler_kind {
            HandlerKind::Echo => Arc::new(Echo),
            HandlerKind::Relay => Arc::new(Relay::new(Arc::clone(gateway))),
        }
    })
    .await?;

    let signal = wait_for_signal().await?;
    tracing::info!(%signal, "Shutdown signal received");
    running.stop(DRAIN_TIMEOUT).await;

    Ok(())
}
