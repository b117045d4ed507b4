//! HTTP-layer failure conditions.

use std::io;

use thiserror::Error;

use crate::http::StatusCode;

/// A failure while reading or writing an HTTP message.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The peer sent something we must refuse; answered with `status`.
    #[error("{message}")]
    Client { status: StatusCode, message: String },

    /// The stream failed underneath us; no response is attempted.
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

impl HttpError {
    pub fn client(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Client {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::client(StatusCode::BAD_REQUEST, message)
    }

    /// The status to answer with, if the connection can still be answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Client { status, .. } => Some(*status),
            Self::Io(_) => None,
        }
    }
}
