//! An upgraded connection as seen by application code.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::sync::{mpsc, Mutex};

use crate::net::Socket;
use crate::observability::metrics;
use crate::websocket::{
    CloseCode, Frame, FrameHandler, FrameParser, FrameType, Message, WebsocketError,
};

/// How long `close` waits to hand the CLOSE frame to a peer before dropping the connection.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket ids are a sequence of their own, starting at 1.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one upgraded connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn next() -> Self {
        Self(CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

impl From<&WebsocketClient> for ClientId {
    fn from(client: &WebsocketClient) -> Self {
        client.id
    }
}

impl From<&Arc<WebsocketClient>> for ClientId {
    fn from(client: &Arc<WebsocketClient>) -> Self {
        client.id
    }
}

/// One upgraded connection.
///
/// Creating a client starts its read loop. Completed messages are taken with
/// `next_message` or `messages`; each message is delivered once.
pub struct WebsocketClient {
    id: ClientId,
    socket: Arc<Socket>,
    handler: Arc<FrameHandler>,
    messages: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl WebsocketClient {
    /// Wrap an upgraded socket and start reading frames from it.
    pub fn new(socket: Arc<Socket>, max_payload_size: u64) -> Arc<Self> {
        let (handler, receiver) = FrameHandler::new(Arc::clone(&socket));
        let handler = Arc::new(handler);
        let client = Arc::new(Self {
            id: ClientId::next(),
            socket: Arc::clone(&socket),
            handler: Arc::clone(&handler),
            messages: Mutex::new(receiver),
        });

        metrics::websocket_client_opened();
        let id = client.id;
        socket.on_close(move || {
            metrics::websocket_client_closed();
            tracing::debug!(client_id = %id, "WebSocket connection closed");
        });

        let mut parser = FrameParser::new(socket, max_payload_size);
        tokio::spawn(async move { handler.read(&mut parser).await });

        client
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.socket.remote_addr()
    }

    pub fn local_address(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Send `data` as TEXT when it is valid UTF-8, otherwise as BINARY.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), WebsocketError> {
        let data = data.into();
        let frame_type = match std::str::from_utf8(&data) {
            Ok(_) => FrameType::Text,
            Err(_) => FrameType::Binary,
        };
        self.handler.write(frame_type, &data, true).await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), WebsocketError> {
        self.handler.write(FrameType::Text, text.as_bytes(), true).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<(), WebsocketError> {
        self.handler.write(FrameType::Binary, data, true).await
    }

    /// Send a message with its own frame type.
    pub async fn send_message(&self, message: &Message) -> Result<(), WebsocketError> {
        self.handler
            .write(message.frame_type(), message.as_bytes(), true)
            .await
    }

    /// Run the closing handshake from our side and close the socket.
    ///
    /// The socket is closed even when the peer stops draining and the CLOSE
    /// frame cannot be written.
    pub async fn close(&self, code: CloseCode, reason: &str) {
        if self.socket.is_closed() {
            return;
        }
        let handshake = self.handler.handle_frame(Frame::close(code, reason));
        match tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(client_id = %self.id, error = %e, "Close handshake failed");
            }
            Err(_) => {
                tracing::debug!(client_id = %self.id, "Close handshake timed out");
            }
        }
        self.socket.close().await;
    }

    pub fn closed(&self) -> bool {
        self.socket.is_closed()
    }

    /// Resolves once the connection has closed.
    pub async fn wait_closed(&self) {
        self.socket.closed().await;
    }

    /// Register a callback invoked once when the connection closes.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.socket.on_close(callback);
    }

    /// The next completed message, or `None` once the connection has closed.
    pub async fn next_message(&self) -> Option<Message> {
        self.messages.lock().await.recv().await
    }

    /// Completed messages as a stream. May be called again; every message
    /// still reaches only one consumer.
    pub fn messages(self: &Arc<Self>) -> impl Stream<Item = Message> + Send + 'static {
        stream::unfold(Arc::clone(self), |client| async move {
            let message = client.next_message().await?;
            Some((message, client))
        })
    }
}

impl fmt::Debug for WebsocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebsocketClient")
            .field("id", &self.id)
            .field("remote_address", &self.socket.remote_addr())
            .field("closed", &self.closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::tests::pair;
    use crate::websocket::handler::tests::read_server_frame;
    use crate::websocket::{parse_close_payload, FrameCompiler, MAX_PAYLOAD_SIZE_LIMIT};
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn ids_are_sequential_and_start_above_zero() {
        let first = ClientId::next();
        let second = ClientId::next();
        assert!(first.as_u64() >= 1);
        assert!(second > first);
        assert_eq!(format!("{}", ClientId(3)), "ws-3");
    }

    #[tokio::test]
    async fn send_picks_frame_type_by_content() {
        let (socket, mut peer) = pair(4096);
        let client = WebsocketClient::new(socket, MAX_PAYLOAD_SIZE_LIMIT);

        client.send("héllo").await.unwrap();
        client.send(vec![0xFFu8, 0xFE]).await.unwrap();

        assert_eq!(read_server_frame(&mut peer).await, (0x81, "héllo".as_bytes().to_vec()));
        assert_eq!(read_server_frame(&mut peer).await, (0x82, vec![0xFF, 0xFE]));
    }

    #[tokio::test]
    async fn messages_stream_resumes_where_it_left_off() {
        let (socket, mut peer) = pair(4096);
        let client = WebsocketClient::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
        for text in ["one", "two", "three"] {
            peer.write_all(&FrameCompiler.compile(FrameType::Text, text.as_bytes(), true, true))
                .await
                .unwrap();
        }

        let first: Vec<Message> = client.messages().take(1).collect().await;
        let rest: Vec<Message> = client.messages().take(2).collect().await;
        assert_eq!(first, vec![Message::Text("one".into())]);
        assert_eq!(
            rest,
            vec![Message::Text("two".into()), Message::Text("three".into())]
        );
    }

    #[tokio::test]
    async fn close_sends_code_and_ends_messages() {
        let (socket, mut peer) = pair(4096);
        let client = WebsocketClient::new(Arc::clone(&socket), MAX_PAYLOAD_SIZE_LIMIT);

        client.close(CloseCode::GoingAway, "restart").await;

        let (head, payload) = read_server_frame(&mut peer).await;
        assert_eq!(head, 0x88);
        assert_eq!(
            parse_close_payload(&payload),
            Some((CloseCode::GoingAway, "restart".to_string()))
        );
        assert!(client.closed());
        let next = tokio::time::timeout(Duration::from_secs(1), client.next_message())
            .await
            .unwrap();
        assert_eq!(next, None);
        assert!(client.send_text("late").await.is_err());
    }

    #[tokio::test]
    async fn close_completes_when_peer_stops_draining() {
        let (socket, _peer) = pair(1);
        let client = WebsocketClient::new(socket, MAX_PAYLOAD_SIZE_LIMIT);

        let sender = Arc::clone(&client);
        let stuck = tokio::spawn(async move { sender.send_text("never drained").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(
            Duration::from_secs(3),
            client.close(CloseCode::GoingAway, "Server shutting down."),
        )
        .await
        .expect("close finishes despite the stuck writer");
        assert!(client.closed());

        let sent = tokio::time::timeout(Duration::from_secs(1), stuck)
            .await
            .expect("stuck send is released by close")
            .unwrap();
        assert!(sent.is_err());
    }

    #[tokio::test]
    async fn peer_disconnect_closes_client() {
        let (socket, peer) = pair(4096);
        let client = WebsocketClient::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
        drop(peer);

        tokio::time::timeout(Duration::from_secs(1), client.wait_closed())
            .await
            .unwrap();
        assert!(client.closed());
    }
}
