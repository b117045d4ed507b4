//! Errors raised while configuring or running the socket server.

use thiserror::Error;

/// Startup and accept-loop failures.
///
/// Everything except `Accept` is fatal before any socket is opened.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listen address could not be parsed or is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The same endpoint was exposed twice.
    #[error("Already listening to {0} on socket server")]
    DuplicateAddress(String),

    /// `serve` was called before any address was exposed.
    #[error("No addresses specified on server")]
    NoAddresses,

    /// Failed to bind a listener.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to accept a connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}
