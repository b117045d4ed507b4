//! HTTP/1.1 message handling subsystem.
//!
//! # Data Flow
//! ```text
//! accepted Socket
//!     → driver.rs (one exchange per connection)
//!     → request.rs (start line, Host, body) via transport.rs
//!     → ChannelFactory (upgrade negotiation)
//!     → response.rs (status line, headers, body, upgrade hand-off)
//! ```
//!
//! # Design Decisions
//! - Only what the upgrade path needs: no keep-alive, no chunked encoding
//! - Header and body limits are enforced while bytes arrive

mod driver;
mod error;
mod headers;
mod message;
mod request;
mod response;
pub(crate) mod transport;

pub use driver::HttpClientDriver;
pub use error::HttpError;
pub use headers::{HeaderBag, InvalidHeaderLine};
pub use message::{Body, Request, Response, StatusCode, UpgradeHandler, Uri};
pub use request::HttpRequestTransport;
pub use response::HttpResponseTransport;
pub use transport::{HttpLimits, DEFAULT_BODY_SIZE_LIMIT, HEADER_SIZE_LIMIT};
