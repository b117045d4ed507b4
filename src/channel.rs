//! Upgrade negotiation.
//!
//! A `ChannelFactory` holds an ordered list of transport factories. The first
//! factory whose predicate accepts a request creates the transport that takes
//! the connection over.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::app::RequestHandler;
use crate::config::LimitsConfig;
use crate::http::{HttpClientDriver, HttpError, Request};
use crate::net::Socket;
use crate::websocket::{WebsocketGateway, WebsocketTransportFactory};

/// Decides whether it can take a request over, and builds the transport that does.
pub trait TransportFactory: Send + Sync {
    fn should_upgrade(&self, request: &Request) -> bool;

    fn create(&self, request: &Request) -> Box<dyn Transport>;
}

/// Takes over a connection after its request has been read.
///
/// The transport answers the request itself through `driver`.
pub trait Transport: Send + Sync {
    fn upgrade<'a>(
        &'a self,
        socket: Arc<Socket>,
        request: Request,
        driver: &'a HttpClientDriver,
    ) -> BoxFuture<'a, Result<(), HttpError>>;
}

/// Ordered set of upgrade strategies.
#[derive(Default)]
pub struct ChannelFactory {
    factories: Vec<Arc<dyn TransportFactory>>,
}

impl ChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory offering only the WebSocket transport.
    pub fn websocket(
        gateway: Arc<WebsocketGateway>,
        handler: Arc<dyn RequestHandler>,
        limits: &LimitsConfig,
    ) -> Self {
        let mut channels = Self::new();
        channels.register(Arc::new(WebsocketTransportFactory::from_config(
            gateway, handler, limits,
        )));
        channels
    }

    /// Append a factory; earlier factories win.
    pub fn register(&mut self, factory: Arc<dyn TransportFactory>) {
        self.factories.push(factory);
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Hand the connection to the first factory that accepts `request`.
    ///
    /// Returns `false` when no factory matched; the caller answers the request.
    pub async fn upgrade(
        &self,
        socket: &Arc<Socket>,
        request: Request,
        driver: &HttpClientDriver,
    ) -> Result<bool, HttpError> {
        let Some(factory) = self
            .factories
            .iter()
            .find(|factory| factory.should_upgrade(&request))
        else {
            return Ok(false);
        };

        let transport = factory.create(&request);
        transport
            .upgrade(Arc::clone(socket), request, driver)
            .await?;
        Ok(true)
    }
}

impl std::fmt::Debug for ChannelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFactory")
            .field("factories", &self.factories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpLimits, Response, StatusCode};
    use crate::net::socket::tests::pair;
    use crate::net::SocketClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Answers every request with a fixed status.
    struct Fixed {
        path: &'static str,
        status: StatusCode,
        created: AtomicUsize,
    }

    impl TransportFactory for Fixed {
        fn should_upgrade(&self, request: &Request) -> bool {
            request.uri().path == self.path
        }

        fn create(&self, _request: &Request) -> Box<dyn Transport> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(FixedTransport(self.status))
        }
    }

    struct FixedTransport(StatusCode);

    impl Transport for FixedTransport {
        fn upgrade<'a>(
            &'a self,
            _socket: Arc<Socket>,
            _request: Request,
            driver: &'a HttpClientDriver,
        ) -> BoxFuture<'a, Result<(), HttpError>> {
            Box::pin(async move {
                driver.send(Response::new(self.0), true).await;
                Ok(())
            })
        }
    }

    fn fixed(path: &'static str, status: StatusCode) -> Arc<Fixed> {
        Arc::new(Fixed {
            path,
            status,
            created: AtomicUsize::new(0),
        })
    }

    async fn run(channels: ChannelFactory, raw: &[u8]) -> String {
        let (socket, mut peer) = pair(8192);
        let driver = HttpClientDriver::new(
            SocketClient::new(socket),
            Arc::new(channels),
            HttpLimits::default(),
        );
        peer.write_all(raw).await.unwrap();
        driver.handle_client().await;

        let mut wire = String::new();
        peer.read_to_string(&mut wire).await.unwrap();
        wire
    }

    #[tokio::test]
    async fn first_matching_factory_wins() {
        let first = fixed("/a", StatusCode::NO_CONTENT);
        let second = fixed("/a", StatusCode::NOT_FOUND);
        let mut channels = ChannelFactory::new();
        channels.register(first.clone());
        channels.register(second.clone());

        let wire = run(channels, b"GET /a HTTP/1.1\r\nHost: h\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert_eq!(first.created.load(Ordering::SeqCst), 1);
        assert_eq!(second.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_through_to_later_factories() {
        let mut channels = ChannelFactory::new();
        channels.register(fixed("/a", StatusCode::NO_CONTENT));
        channels.register(fixed("/b", StatusCode::NOT_FOUND));
        assert_eq!(channels.len(), 2);

        let wire = run(channels, b"GET /b HTTP/1.1\r\nHost: h\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn unmatched_request_is_not_upgraded() {
        let mut channels = ChannelFactory::new();
        channels.register(fixed("/a", StatusCode::NO_CONTENT));

        let wire = run(channels, b"GET /other HTTP/1.1\r\nHost: h\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
