//! WebSocket-layer failure conditions.

use std::borrow::Cow;
use std::io;

use thiserror::Error;

use crate::websocket::CloseCode;

/// A failure on an upgraded connection.
#[derive(Debug, Error)]
pub enum WebsocketError {
    /// The peer broke the framing rules; answered with a CLOSE carrying `code`.
    #[error("{message}")]
    Protocol {
        code: CloseCode,
        message: Cow<'static, str>,
    },

    /// The stream failed underneath us.
    #[error("stream error: {0}")]
    Io(#[from] io::Error),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

impl WebsocketError {
    pub fn protocol(message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_code(CloseCode::ProtocolError, message)
    }

    pub fn too_large(message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_code(CloseCode::PayloadTooLarge, message)
    }

    pub fn with_code(code: CloseCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// The close code to send back, if the connection can still be answered.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            Self::Io(_) | Self::Closed => None,
        }
    }
}
