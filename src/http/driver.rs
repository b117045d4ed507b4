//! Per-connection HTTP driver.
//!
//! # Data Flow
//! ```text
//! SocketClient
//!     → HttpRequestTransport::receive
//!     → ChannelFactory::upgrade ─┬─ matched: transport answers (101 or error) and takes over
//!                                └─ no match: 400 {"status": "No applicable transport found."}
//! client condition → status response + close
//! stream error     → close
//! ```

use std::sync::Arc;

use serde_json::json;

use crate::channel::ChannelFactory;
use crate::http::{
    HttpError, HttpLimits, HttpRequestTransport, HttpResponseTransport, Response, StatusCode,
};
use crate::net::{Socket, SocketClient};
use crate::observability::metrics;

/// Drives one accepted connection through its single HTTP exchange.
pub struct HttpClientDriver {
    client: SocketClient,
    channels: Arc<ChannelFactory>,
    requests: HttpRequestTransport,
    responses: HttpResponseTransport,
}

impl HttpClientDriver {
    pub fn new(client: SocketClient, channels: Arc<ChannelFactory>, limits: HttpLimits) -> Self {
        Self {
            client,
            channels,
            requests: HttpRequestTransport::new(limits),
            responses: HttpResponseTransport::new(limits),
        }
    }

    pub fn client(&self) -> &SocketClient {
        &self.client
    }

    pub fn socket(&self) -> &Arc<Socket> {
        self.client.socket()
    }

    /// Read the request and hand it to the first transport that accepts it.
    pub async fn handle_client(&self) {
        let socket = Arc::clone(self.socket());

        let request = match self.requests.receive(&socket).await {
            Ok(request) => request,
            Err(e) => return self.fail(e).await,
        };
        tracing::debug!(
            connection_id = %self.client.id(),
            method = request.method(),
            target = %request.uri(),
            "Request received"
        );

        match self.channels.upgrade(&socket, request, self).await {
            Ok(true) => {}
            Ok(false) => {
                let response = Response::json(
                    StatusCode::BAD_REQUEST,
                    &json!({ "status": "No applicable transport found." }),
                );
                self.send(response, true).await;
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Write a response, closing the connection afterwards when `close` is set.
    ///
    /// Stream failures close the connection and are not reported further.
    pub async fn send(&self, mut response: Response, close: bool) {
        let status = response.status();
        if close {
            response.headers.set("Connection", "close");
        }

        match self.responses.send(response, self.socket()).await {
            Ok(()) => metrics::record_response(status.as_u16()),
            Err(e) => {
                tracing::debug!(
                    connection_id = %self.client.id(),
                    error = %e,
                    "Failed to write response"
                );
                self.client.close().await;
                return;
            }
        }

        if close {
            self.client.close().await;
        }
    }

    async fn fail(&self, error: HttpError) {
        match error.status() {
            Some(status) => {
                tracing::debug!(
                    connection_id = %self.client.id(),
                    remote = %self.client.remote_address(),
                    status = status.as_u16(),
                    error = %error,
                    "Rejecting request"
                );
                self.send(Response::text(status, error.to_string()), true)
                    .await;
            }
            None => {
                tracing::debug!(
                    connection_id = %self.client.id(),
                    error = %error,
                    "Connection dropped while reading request"
                );
                self.client.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::tests::pair;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn exchange(raw: &[u8]) -> String {
        let (socket, mut peer) = pair(16 * 1024);
        let driver = HttpClientDriver::new(
            SocketClient::new(socket),
            Arc::new(ChannelFactory::new()),
            HttpLimits::default(),
        );
        peer.write_all(raw).await.unwrap();

        driver.handle_client().await;
        assert!(driver.client().closed());

        let mut wire = String::new();
        peer.read_to_string(&mut wire).await.unwrap();
        wire
    }

    #[tokio::test]
    async fn no_transport_answers_json_400() {
        let wire = exchange(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.ends_with(r#"{"status":"No applicable transport found."}"#));
    }

    #[tokio::test]
    async fn client_errors_are_answered_with_their_status() {
        let wire = exchange(b"BROKEN\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.ends_with("Invalid start line in request"));
    }

    #[tokio::test]
    async fn vanished_peer_closes_connection() {
        let (socket, peer) = pair(64);
        let driver = HttpClientDriver::new(
            SocketClient::new(Arc::clone(&socket)),
            Arc::new(ChannelFactory::new()),
            HttpLimits::default(),
        );
        drop(peer);

        driver.handle_client().await;
        assert!(socket.is_closed());
    }
}
