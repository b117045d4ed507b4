//! Frame vocabulary: opcodes, close codes, frames and completed messages.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// The four-bit opcode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl FrameType {
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Data frames may be split across several frames.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Raw opcode that maps to no frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for FrameType {
    type Error = UnknownOpcode;

    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        match opcode {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(UnknownOpcode(other)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close status codes (RFC 6455 section 7.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    UnsupportedData,
    /// 1007
    DataTypeMismatch,
    /// 1008
    PolicyViolation,
    /// 1009
    PayloadTooLarge,
    /// 1010
    ExtensionNegotiationFailed,
    /// 1011
    UnexpectedCondition,
    /// Any other code a peer sent.
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnsupportedData => 1003,
            Self::DataTypeMismatch => 1007,
            Self::PolicyViolation => 1008,
            Self::PayloadTooLarge => 1009,
            Self::ExtensionNegotiationFailed => 1010,
            Self::UnexpectedCondition => 1011,
            Self::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1007 => Self::DataTypeMismatch,
            1008 => Self::PolicyViolation,
            1009 => Self::PayloadTooLarge,
            1010 => Self::ExtensionNegotiationFailed,
            1011 => Self::UnexpectedCondition,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// One decoded frame, unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub finished: bool,
    pub opcode: FrameType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: FrameType, payload: impl Into<Bytes>, finished: bool) -> Self {
        Self {
            finished,
            opcode,
            payload: payload.into(),
        }
    }

    /// A final CLOSE frame carrying `code` and `reason`.
    ///
    /// The reason is cut at a character boundary so the payload stays
    /// within the control frame limit.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut reason = reason;
        while reason.len() > MAX_CONTROL_PAYLOAD - 2 {
            let mut end = MAX_CONTROL_PAYLOAD - 2;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason = &reason[..end];
        }

        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code.as_u16());
        payload.put_slice(reason.as_bytes());
        Self::new(FrameType::Close, payload.freeze(), true)
    }

    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }
}

/// Status code and reason carried by a CLOSE payload.
///
/// An empty payload has neither.
pub fn parse_close_payload(payload: &[u8]) -> Option<(CloseCode, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Some((CloseCode::from(code), reason))
}

/// A reassembled application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Text(_) => FrameType::Text,
            Self::Binary(_) => FrameType::Binary,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_map_both_ways() {
        for opcode in [0x0, 0x1, 0x2, 0x8, 0x9, 0xA] {
            let frame_type = FrameType::try_from(opcode).unwrap();
            assert_eq!(frame_type as u8, opcode);
        }
        for reserved in [0x3, 0x7, 0xB, 0xF] {
            assert_eq!(FrameType::try_from(reserved), Err(UnknownOpcode(reserved)));
        }
    }

    #[test]
    fn close_payload_layout() {
        let frame = Frame::close(CloseCode::Normal, "bye");
        assert_eq!(&frame.payload[..], &[0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(
            parse_close_payload(&frame.payload),
            Some((CloseCode::Normal, "bye".to_string()))
        );
        assert_eq!(parse_close_payload(&[]), None);
    }

    #[test]
    fn close_reason_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let frame = Frame::close(CloseCode::GoingAway, &reason);
        assert!(frame.payload.len() <= MAX_CONTROL_PAYLOAD);
        assert!(std::str::from_utf8(&frame.payload[2..]).is_ok());
    }

    #[test]
    fn close_codes_round_trip_through_u16() {
        assert_eq!(CloseCode::from(1011), CloseCode::UnexpectedCondition);
        assert_eq!(CloseCode::from(4000), CloseCode::Other(4000));
        assert_eq!(CloseCode::PayloadTooLarge.as_u16(), 1009);
    }
}
