//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate process-wide connection IDs for log correlation
//! - Wrap an accepted socket as a `SocketClient`
//! - Count live connections so shutdown can wait for them to drain

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::net::Socket;

/// Global atomic counter for HTTP-layer connection IDs.
/// Relaxed ordering is enough: we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An accepted connection before any protocol upgrade.
#[derive(Debug, Clone)]
pub struct SocketClient {
    id: ConnectionId,
    socket: Arc<Socket>,
}

impl SocketClient {
    pub fn new(socket: Arc<Socket>) -> Self {
        let id = ConnectionId::new();
        tracing::debug!(
            connection_id = %id,
            remote = %socket.remote_addr(),
            local = %socket.local_addr(),
            "Accepted connection"
        );
        Self { id, socket }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.socket.remote_addr()
    }

    pub fn local_address(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub async fn close(&self) {
        self.socket.close().await;
    }

    /// Registers a callback to invoke once the socket is closed.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.socket.on_close(callback);
    }

    pub fn closed(&self) -> bool {
        self.socket.is_closed()
    }
}

/// Tracks live connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection has closed.
    pub async fn wait_until_idle(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the live count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::tests::pair;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track(ConnectionId::new());
        let guard2 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn guard_released_when_socket_closes() {
        let tracker = ConnectionTracker::new();
        let (socket, _peer) = pair(64);
        let client = SocketClient::new(socket);

        let guard = tracker.track(client.id());
        client.on_close(move || drop(guard));
        assert_eq!(tracker.active_count(), 1);

        client.close().await;
        assert!(client.closed());
        assert_eq!(tracker.active_count(), 0);
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_until_idle())
            .await
            .unwrap();
    }
}
