//! TCP listener with backpressure.
//!
//! # Responsibilities
//! - Bind to one exposed endpoint
//! - Accept incoming TCP connections
//! - Enforce max_connections via a semaphore shared by every listener

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::net::{Endpoint, ServerError};

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, new connections wait until a slot becomes available.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Bind to `endpoint`, sharing `connection_limit` with the other listeners.
    pub async fn bind(
        endpoint: Endpoint,
        connection_limit: Arc<Semaphore>,
    ) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            address: endpoint.to_string(),
            source,
        };

        let listener = TcpListener::bind(endpoint.socket_addr())
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(
            address = %local_addr,
            available_permits = connection_limit.available_permits(),
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ServerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| {
                ServerError::Accept(std::io::Error::other("connection limit closed"))
            })?;

        let (stream, addr) = self.inner.accept().await.map_err(ServerError::Accept)?;

        tracing::trace!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
