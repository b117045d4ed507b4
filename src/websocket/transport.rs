//! WebSocket upgrade: handshake validation and hand-off to the frame engine.
//!
//! # Data Flow
//! ```text
//! Request ─ should_upgrade? ─→ handshake()
//!     ├─ rejected: status response, Connection: close
//!     └─ 101: response.upgrade(..) runs after flush
//!             → WebsocketClient::new (read loop task)
//!             → gateway.register
//!             → RequestHandler::handle (own task)
//!             → close 1000 on return, 1011 on error or panic
//! ```

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use sha1::{Digest, Sha1};

use crate::app::RequestHandler;
use crate::channel::{Transport, TransportFactory};
use crate::config::LimitsConfig;
use crate::http::{Body, HttpClientDriver, HttpError, Request, Response, StatusCode};
use crate::net::Socket;
use crate::observability::metrics;
use crate::websocket::{CloseCode, WebsocketClient, WebsocketGateway, MAX_PAYLOAD_SIZE_LIMIT};

/// Fixed GUID appended to the client key (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version we speak.
pub const WEBSOCKET_VERSION: &str = "13";

/// `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

fn is_websocket_upgrade(request: &Request) -> bool {
    request
        .headers
        .get("upgrade")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"))
}

/// Validate an upgrade request and build the answer to it.
///
/// Anything other than `101 Switching Protocols` means the handshake was refused.
pub fn handshake(request: &Request) -> Response {
    let refuse = |status: StatusCode| Response::new(status).with_body(Body::empty());

    if request.method() != "GET" {
        let mut response = refuse(StatusCode::METHOD_NOT_ALLOWED);
        response.headers.set("Allow", "GET");
        return response;
    }
    if request.version() != "1.1" {
        let mut response = refuse(StatusCode::HTTP_VERSION_NOT_SUPPORTED);
        response.headers.set("Upgrade", "websocket");
        return response;
    }
    if !is_websocket_upgrade(request) {
        let mut response = Response::text(
            StatusCode::UPGRADE_REQUIRED,
            "\"Upgrade: websocket\" header is required.",
        );
        response.headers.set("Upgrade", "websocket");
        return response;
    }
    if !request.headers.has("connection", "upgrade") {
        let mut response = Response::text(
            StatusCode::UPGRADE_REQUIRED,
            "\"Connection: Upgrade\" header is required.",
        );
        response.headers.set("Upgrade", "websocket");
        return response;
    }

    let Some(key) = request
        .headers
        .get("sec-websocket-key")
        .filter(|key| !key.is_empty())
    else {
        return Response::text(
            StatusCode::BAD_REQUEST,
            "\"Sec-WebSocket-Key\" header is required.",
        );
    };

    if request.headers.get("sec-websocket-version") != Some(WEBSOCKET_VERSION) {
        let mut response = Response::text(
            StatusCode::BAD_REQUEST,
            "Requested WebSocket version unavailable.",
        );
        response
            .headers
            .set("Sec-WebSocket-Version", WEBSOCKET_VERSION);
        return response;
    }

    let mut response = Response::new(StatusCode::SWITCHING_PROTOCOLS);
    response.headers.set("Connection", "Upgrade");
    response.headers.set("Upgrade", "websocket");
    response.headers.set("Sec-WebSocket-Accept", accept_key(key));
    response
}

/// Recognises WebSocket upgrade requests.
pub struct WebsocketTransportFactory {
    gateway: Arc<WebsocketGateway>,
    handler: Arc<dyn RequestHandler>,
    max_payload_size: u64,
}

impl WebsocketTransportFactory {
    pub fn new(gateway: Arc<WebsocketGateway>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            gateway,
            handler,
            max_payload_size: MAX_PAYLOAD_SIZE_LIMIT,
        }
    }

    pub fn from_config(
        gateway: Arc<WebsocketGateway>,
        handler: Arc<dyn RequestHandler>,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            max_payload_size: limits.max_payload_size,
            ..Self::new(gateway, handler)
        }
    }
}

impl TransportFactory for WebsocketTransportFactory {
    fn should_upgrade(&self, request: &Request) -> bool {
        request.method() == "GET"
            && is_websocket_upgrade(request)
            && request.headers.has("connection", "upgrade")
    }

    fn create(&self, _request: &Request) -> Box<dyn Transport> {
        Box::new(WebsocketTransport {
            gateway: Arc::clone(&self.gateway),
            handler: Arc::clone(&self.handler),
            max_payload_size: self.max_payload_size,
        })
    }
}

/// Carries one connection through the handshake.
pub struct WebsocketTransport {
    gateway: Arc<WebsocketGateway>,
    handler: Arc<dyn RequestHandler>,
    max_payload_size: u64,
}

impl Transport for WebsocketTransport {
    fn upgrade<'a>(
        &'a self,
        socket: Arc<Socket>,
        request: Request,
        driver: &'a HttpClientDriver,
    ) -> BoxFuture<'a, Result<(), HttpError>> {
        Box::pin(async move {
            let mut response = handshake(&request);
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                tracing::debug!(
                    connection_id = %driver.client().id(),
                    status = response.status().as_u16(),
                    "WebSocket handshake refused"
                );
                response.headers.remove("Sec-WebSocket-Accept");
                driver.send(response, true).await;
                return Ok(());
            }

            let gateway = Arc::clone(&self.gateway);
            let handler = Arc::clone(&self.handler);
            let max_payload_size = self.max_payload_size;
            response.upgrade(move || {
                let client = WebsocketClient::new(socket, max_payload_size);
                metrics::record_upgrade();
                tracing::debug!(
                    client_id = %client.id(),
                    remote = %client.remote_address(),
                    "WebSocket connection established"
                );
                gateway.register(Arc::clone(&client));
                tokio::spawn(dispatch(handler, request, client));
            });

            driver.send(response, false).await;
            Ok(())
        })
    }
}

/// Run the application entry point and close the connection once it returns.
async fn dispatch(
    handler: Arc<dyn RequestHandler>,
    request: Request,
    client: Arc<WebsocketClient>,
) {
    let outcome = tokio::spawn(handler.handle(request, Arc::clone(&client))).await;

    match outcome {
        Ok(Ok(())) => {
            client.close(CloseCode::Normal, "Closing connection.").await;
        }
        Ok(Err(e)) => {
            tracing::error!(client_id = %client.id(), error = %e, "Request handler failed");
            client
                .close(CloseCode::UnexpectedCondition, "Internal error.")
                .await;
        }
        Err(e) => {
            tracing::error!(client_id = %client.id(), error = %e, "Request handler panicked");
            client
                .close(CloseCode::UnexpectedCondition, "Internal error.")
                .await;
        }
    }
}
