//! Application entry point for upgraded connections.
//!
//! A `RequestHandler` receives the upgrade request together with its
//! `WebsocketClient` and runs for as long as it wants the connection. When
//! it returns the connection is closed: 1000 on success, 1011 on error.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::Request;
use crate::websocket::{WebsocketClient, WebsocketGateway};

pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Handles one upgraded connection.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(
        &self,
        request: Request,
        client: Arc<WebsocketClient>,
    ) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Request, Arc<WebsocketClient>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(
        &self,
        request: Request,
        client: Arc<WebsocketClient>,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(request, client))
    }
}

/// Sends every message back to the client that sent it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl RequestHandler for Echo {
    fn handle(
        &self,
        _request: Request,
        client: Arc<WebsocketClient>,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(async move {
            while let Some(message) = client.next_message().await {
                client.send_message(&message).await?;
            }
            Ok(())
        })
    }
}

/// Forwards every message to all connected clients.
#[derive(Debug, Clone)]
pub struct Relay {
    gateway: Arc<WebsocketGateway>,
}

impl Relay {
    pub fn new(gateway: Arc<WebsocketGateway>) -> Self {
        Self { gateway }
    }
}

impl RequestHandler for Relay {
    fn handle(
        &self,
        request: Request,
        client: Arc<WebsocketClient>,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        let gateway = Arc::clone(&self.gateway);
        Box::pin(async move {
            tracing::debug!(
                client_id = %client.id(),
                path = %request.uri().path,
                "Relaying messages"
            );
            while let Some(message) = client.next_message().await {
                gateway.broadcast(message);
            }
            Ok(())
        })
    }
}
