//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → socket.rs (shared read/write handle, close subscribers)
//!     → connection.rs (connection ID, live tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - One accept loop per exposed endpoint, one task per connection
//! - Connection slots are released when the socket closes, not when the
//!   HTTP phase ends, so upgraded connections still count

pub mod address;
pub mod connection;
pub mod error;
pub mod listener;
pub mod server;
pub mod socket;

pub use address::Endpoint;
pub use connection::{ConnectionId, ConnectionTracker, SocketClient};
pub use error::ServerError;
pub use server::SocketServer;
pub use socket::Socket;
