//! Registry of live WebSocket connections with chunked broadcast.
//!
//! # Design Decisions
//! - Clients unregister themselves through their close callback, which holds
//!   only a weak reference to the registry
//! - Broadcast is fire-and-forget: every send is its own task, and the
//!   per-chunk timeout only bounds how long a chunk is waited on
//! - A client keeps at most one broadcast send in flight; broadcasts that
//!   arrive while it is still pending skip that client

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::websocket::{ClientId, CloseCode, Message, WebsocketClient};

pub const DEFAULT_BROADCAST_CHUNK_SIZE: usize = 20;
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(20);

type Registry = DashMap<ClientId, Arc<WebsocketClient>>;
type InFlight = DashSet<ClientId>;

/// Tracks every upgraded connection.
#[derive(Debug)]
pub struct WebsocketGateway {
    clients: Arc<Registry>,
    in_flight: Arc<InFlight>,
    chunk_size: usize,
    timeout: Duration,
}

impl WebsocketGateway {
    pub fn new(chunk_size: usize, timeout: Duration) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashSet::new()),
            chunk_size: chunk_size.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.broadcast_chunk_size,
            Duration::from_millis(config.broadcast_timeout_ms),
        )
    }

    /// Track `client` until it closes.
    pub fn register(&self, client: Arc<WebsocketClient>) {
        let id = client.id();
        let registry: Weak<Registry> = Arc::downgrade(&self.clients);
        self.clients.insert(id, Arc::clone(&client));

        client.on_close(move || {
            if let Some(clients) = registry.upgrade() {
                clients.remove(&id);
            }
        });
        tracing::debug!(client_id = %id, clients = self.clients.len(), "WebSocket client registered");
    }

    /// Stop tracking a client. Unknown ids are ignored.
    pub fn unregister(&self, client: impl Into<ClientId>) {
        self.clients.remove(&client.into());
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<WebsocketClient>> {
        self.clients.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Broadcast sends that have not finished yet, at most one per client.
    pub fn pending_sends(&self) -> usize {
        self.in_flight.len()
    }

    /// Send `message` to every registered client.
    ///
    /// Clients are split into chunks; each chunk is delivered concurrently
    /// under one shared timeout. Individual failures are not reported.
    pub fn broadcast(&self, message: impl Into<Message>) -> Broadcast {
        let message = message.into();
        let clients: Vec<Arc<WebsocketClient>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let groups = clients
            .chunks(self.chunk_size)
            .map(|chunk| {
                tokio::spawn(deliver_chunk(
                    chunk.to_vec(),
                    message.clone(),
                    Arc::clone(&self.in_flight),
                    self.timeout,
                ))
            })
            .collect();

        Broadcast { groups }
    }

    /// Close every registered client with `code` and `reason`.
    ///
    /// Clients are closed concurrently, so a stalled peer does not hold up the rest.
    pub async fn close_all(&self, code: CloseCode, reason: &str) {
        let clients: Vec<Arc<WebsocketClient>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut closing: FuturesUnordered<_> = clients
            .iter()
            .map(|client| client.close(code, reason))
            .collect();
        while closing.next().await.is_some() {}
    }
}

impl Default for WebsocketGateway {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CHUNK_SIZE, DEFAULT_BROADCAST_TIMEOUT)
    }
}

/// Marks a client as having a broadcast send in flight until dropped.
struct PendingSend {
    in_flight: Arc<InFlight>,
    id: ClientId,
}

impl PendingSend {
    fn begin(in_flight: &Arc<InFlight>, id: ClientId) -> Option<Self> {
        in_flight.insert(id).then(|| Self {
            in_flight: Arc::clone(in_flight),
            id,
        })
    }
}

impl Drop for PendingSend {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

async fn deliver_chunk(
    clients: Vec<Arc<WebsocketClient>>,
    message: Message,
    in_flight: Arc<InFlight>,
    timeout: Duration,
) -> usize {
    let message = Arc::new(message);
    let mut sends: FuturesUnordered<JoinHandle<bool>> = FuturesUnordered::new();
    for client in clients {
        let Some(pending) = PendingSend::begin(&in_flight, client.id()) else {
            tracing::debug!(client_id = %client.id(), "Previous broadcast still pending, skipping client");
            continue;
        };
        let message = Arc::clone(&message);
        sends.push(tokio::spawn(async move {
            let _pending = pending;
            client.send_message(&message).await.is_ok()
        }));
    }

    let mut delivered = 0;
    let wait = async {
        while let Some(sent) = sends.next().await {
            if matches!(sent, Ok(true)) {
                delivered += 1;
            }
        }
    };
    if tokio::time::timeout(timeout, wait).await.is_err() {
        tracing::debug!(
            timeout_ms = timeout.as_millis() as u64,
            "Broadcast chunk timed out"
        );
    }
    delivered
}

/// Handle to a running broadcast.
#[derive(Debug)]
pub struct Broadcast {
    groups: Vec<JoinHandle<usize>>,
}

impl Broadcast {
    /// Number of concurrently dispatched chunks.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Wait for every chunk and return how many clients were reached in time.
    pub async fn delivered(self) -> usize {
        let mut total = 0;
        for group in self.groups {
            total += group.await.unwrap_or(0);
        }
        total
    }
}
