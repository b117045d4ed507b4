//! WebSocket protocol engine (RFC 6455).
//!
//! # Responsibilities
//! - Negotiate the upgrade from an HTTP/1.1 request
//! - Decode client frames incrementally and enforce the frame rules
//! - Encode server frames
//! - Expose each connection as a `WebsocketClient` and track them in a gateway
//!
//! # Data Flow
//! ```text
//! Socket → FrameParser → FrameHandler ─┬─ PING/CLOSE answered on the socket
//!                                      └─ Message queue → WebsocketClient → application
//! application → WebsocketClient::send → FrameCompiler → Socket
//! ```
//!
//! # Design Decisions
//! - No extensions are negotiated, so compression and RSV bits are never used
//! - Server frames are never masked

mod client;
mod compiler;
mod error;
mod frame;
mod gateway;
mod handler;
pub mod mask;
mod parser;
mod transport;

pub use client::{ClientId, WebsocketClient};
pub use compiler::FrameCompiler;
pub use error::WebsocketError;
pub use frame::{
    parse_close_payload, CloseCode, Frame, FrameType, Message, UnknownOpcode, MAX_CONTROL_PAYLOAD,
};
pub use gateway::{
    Broadcast, WebsocketGateway, DEFAULT_BROADCAST_CHUNK_SIZE, DEFAULT_BROADCAST_TIMEOUT,
};
pub use handler::FrameHandler;
pub use parser::{FrameParser, MAX_PAYLOAD_SIZE_LIMIT};
pub use transport::{
    accept_key, handshake, WebsocketTransport, WebsocketTransportFactory, WEBSOCKET_GUID,
    WEBSOCKET_VERSION,
};
