//! Socket server: accept loops and per-connection tasks.
//!
//! # Data Flow
//! ```text
//! expose("host:port") ... expose(...)
//!     → serve() binds every endpoint, one accept loop each
//!     → accepted stream → SocketClient → HttpClientDriver (own task)
//! terminate() stops every accept loop; live connections carry on
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

use crate::channel::ChannelFactory;
use crate::config::ServerConfig;
use crate::http::{HttpClientDriver, HttpLimits};
use crate::lifecycle::Shutdown;
use crate::net::listener::{ConnectionPermit, Listener};
use crate::net::{ConnectionTracker, Endpoint, ServerError, Socket, SocketClient};
use crate::observability::metrics;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Listens on any number of endpoints and drives every accepted connection.
///
/// Dropping the server stops its accept loops, same as `terminate`.
pub struct SocketServer {
    addresses: Vec<Endpoint>,
    channels: Arc<ChannelFactory>,
    limits: HttpLimits,
    connection_limit: Arc<Semaphore>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    accept_loops: Vec<JoinHandle<()>>,
}

impl SocketServer {
    pub fn new(channels: Arc<ChannelFactory>, limits: HttpLimits, max_connections: usize) -> Self {
        Self {
            addresses: Vec::new(),
            channels,
            limits,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
            accept_loops: Vec::new(),
        }
    }

    /// Build a server exposing every configured listen address.
    pub fn from_config(
        config: &ServerConfig,
        channels: Arc<ChannelFactory>,
    ) -> Result<Self, ServerError> {
        let mut server = Self::new(
            channels,
            HttpLimits::from(&config.limits),
            config.listener.max_connections,
        );
        for address in &config.listener.addresses {
            server.expose(address)?;
        }
        Ok(server)
    }

    /// Register an endpoint to listen on once `serve` is called.
    pub fn expose(&mut self, endpoint: &str) -> Result<Endpoint, ServerError> {
        let endpoint: Endpoint = endpoint.parse()?;
        if self.addresses.contains(&endpoint) {
            return Err(ServerError::DuplicateAddress(endpoint.to_string()));
        }
        self.addresses.push(endpoint);
        Ok(endpoint)
    }

    pub fn addresses(&self) -> &[Endpoint] {
        &self.addresses
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Bind every exposed endpoint and start accepting.
    ///
    /// If any bind fails, listeners bound so far are released and the error
    /// is returned. Returns the bound local addresses.
    pub async fn serve(&mut self) -> Result<Vec<SocketAddr>, ServerError> {
        if self.addresses.is_empty() {
            return Err(ServerError::NoAddresses);
        }

        let mut listeners = Vec::with_capacity(self.addresses.len());
        for endpoint in &self.addresses {
            // Dropping `listeners` on the error path closes what was bound already.
            listeners.push(Listener::bind(*endpoint, Arc::clone(&self.connection_limit)).await?);
        }

        let mut local_addrs = Vec::with_capacity(listeners.len());
        for (endpoint, listener) in self.addresses.iter().zip(listeners) {
            let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
                address: endpoint.to_string(),
                source,
            })?;
            local_addrs.push(local_addr);

            let context = ConnectionContext {
                channels: Arc::clone(&self.channels),
                limits: self.limits,
                tracker: self.tracker.clone(),
            };
            let shutdown = self.shutdown.subscribe();
            self.accept_loops
                .push(tokio::spawn(accept_loop(listener, context, shutdown)));
        }

        Ok(local_addrs)
    }

    /// Stop accepting on every listener.
    pub fn terminate(&mut self) {
        self.shutdown.trigger();
    }

    /// Wait for every accept loop to finish after `terminate`.
    pub async fn wait(&mut self) {
        for accept_loop in self.accept_loops.drain(..) {
            if let Err(e) = accept_loop.await {
                tracing::error!(error = %e, "Accept loop ended abnormally");
            }
        }
    }
}

#[derive(Clone)]
struct ConnectionContext {
    channels: Arc<ChannelFactory>,
    limits: HttpLimits,
    tracker: ConnectionTracker,
}

async fn accept_loop(
    listener: Listener,
    context: ConnectionContext,
    mut shutdown: broadcast::Receiver<()>,
) {
    let local_addr = listener.local_addr().ok();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer, permit)) => {
                    tokio::spawn(handle_client(stream, permit, context.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    tracing::info!(address = ?local_addr, "Listener closed");
}

async fn handle_client(stream: TcpStream, permit: ConnectionPermit, context: ConnectionContext) {
    let socket = match Socket::from_tcp(stream) {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            tracing::debug!(error = %e, "Dropping connection without addresses");
            return;
        }
    };

    let client = SocketClient::new(socket);
    let guard = context.tracker.track(client.id());
    client.on_close(move || {
        drop(guard);
        drop(permit);
    });
    metrics::record_connection();

    let driver = HttpClientDriver::new(client, context.channels, context.limits);
    driver.handle_client().await;
}
