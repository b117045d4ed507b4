//! Rebound: HTTP/1.1 upgrade server with a WebSocket (RFC 6455) engine.

pub mod app;
pub mod channel;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod websocket;

pub use app::{Echo, HandlerError, Relay, RequestHandler};
pub use channel::ChannelFactory;
pub use config::ServerConfig;
pub use lifecycle::Shutdown;
pub use net::SocketServer;
pub use websocket::{Message, WebsocketClient, WebsocketGateway};
