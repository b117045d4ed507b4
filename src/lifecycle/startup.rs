//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Bind listeners and begin accepting traffic
//! - Stop accepting, close WebSocket clients and drain on the way out
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - Draining has a deadline; connections still open after it are abandoned

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::app::RequestHandler;
use crate::channel::ChannelFactory;
use crate::config::ServerConfig;
use crate::net::{ServerError, SocketServer};
use crate::observability;
use crate::websocket::{CloseCode, WebsocketGateway};

/// Why the server could not start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),
}

/// A server that is accepting connections.
pub struct Running {
    server: SocketServer,
    gateway: Arc<WebsocketGateway>,
    local_addrs: Vec<SocketAddr>,
}

impl Running {
    pub fn gateway(&self) -> &Arc<WebsocketGateway> {
        &self.gateway
    }

    /// Addresses actually bound, in configuration order.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn server(&self) -> &SocketServer {
        &self.server
    }

    /// Stop accepting, close every WebSocket client with 1001 and wait up to
    /// `drain_timeout` for the remaining connections.
    pub async fn stop(mut self, drain_timeout: Duration) {
        self.server.terminate();
        self.server.wait().await;

        self.gateway
            .close_all(CloseCode::GoingAway, "Server shutting down.")
            .await;

        let tracker = self.server.tracker().clone();
        if tokio::time::timeout(drain_timeout, tracker.wait_until_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Drain deadline passed with connections still open"
            );
        }
        tracing::info!("Server stopped");
    }
}

/// Build every subsystem from `config` and start listening.
///
/// `make_handler` receives the gateway so handlers can broadcast.
pub async fn start<F>(config: &ServerConfig, make_handler: F) -> Result<Running, StartupError>
where
    F: FnOnce(&Arc<WebsocketGateway>) -> Arc<dyn RequestHandler>,
{
    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(address.clone()))?;
        observability::init_metrics(addr)?;
    }

    let gateway = Arc::new(WebsocketGateway::from_config(&config.gateway));
    let handler = make_handler(&gateway);
    let channels = Arc::new(ChannelFactory::websocket(
        Arc::clone(&gateway),
        handler,
        &config.limits,
    ));

    let mut server = SocketServer::from_config(config, channels)?;
    let local_addrs = server.serve().await?;
    for addr in &local_addrs {
        tracing::info!(address = %addr, "Listening for connections");
    }

    Ok(Running {
        server,
        gateway,
        local_addrs,
    })
}
