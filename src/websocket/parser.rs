//! Incremental frame decoder.
//!
//! # Data Flow
//! ```text
//! Socket::read chunks → buffer
//!     → read_exactly(2)            FIN, RSV, opcode, MASK, 7-bit length
//!     → read_exactly(2 | 8)        extended length, if any
//!     → read_exactly(4)            mask key, if masked
//!     → read_exactly(length)       payload, unmasked in place
//!     → Frame → FrameHandler::handle_frame
//! ```
//!
//! # Design Decisions
//! - Each field is pulled with `read_exactly`, which suspends until that many
//!   bytes are buffered. Parsing never stops halfway through a field.
//! - The payload ceiling is cumulative over the connection, not per frame

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::net::Socket;
use crate::websocket::mask::apply_mask;
use crate::websocket::{Frame, FrameHandler, FrameType, WebsocketError};

/// Default ceiling on payload bytes received over one connection.
pub const MAX_PAYLOAD_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

const FIN_BIT: u8 = 0b1000_0000;
const RSV_BITS: u8 = 0b0111_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const MASK_BIT: u8 = 0b1000_0000;
const LENGTH_BITS: u8 = 0b0111_1111;

/// Pulls frames off one socket.
#[derive(Debug)]
pub struct FrameParser {
    socket: Arc<Socket>,
    buffer: BytesMut,
    received_bytes: u64,
    max_payload_size: u64,
    cancelled: bool,
}

impl FrameParser {
    pub fn new(socket: Arc<Socket>, max_payload_size: u64) -> Self {
        Self {
            socket,
            buffer: BytesMut::new(),
            received_bytes: 0,
            max_payload_size,
            cancelled: false,
        }
    }

    /// Stop parsing. Buffered bytes are dropped and no further frames are produced.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.buffer.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Payload bytes received so far.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Wait until `n` bytes are buffered and take exactly those.
    ///
    /// `None` means the stream ended or the parser was cancelled first.
    pub async fn read_exactly(&mut self, n: usize) -> Result<Option<Bytes>, WebsocketError> {
        while self.buffer.len() < n {
            if self.cancelled {
                return Ok(None);
            }
            match self.socket.read().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
        if self.cancelled {
            return Ok(None);
        }
        Ok(Some(self.buffer.split_to(n).freeze()))
    }

    /// Decode the next frame, or `None` once the stream has ended.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, WebsocketError> {
        let Some(head) = self.read_exactly(2).await? else {
            return Ok(None);
        };

        let finished = head[0] & FIN_BIT != 0;
        let opcode = head[0] & OPCODE_BITS;
        let masked = head[1] & MASK_BIT != 0;

        if head[0] & RSV_BITS != 0 {
            return Err(WebsocketError::protocol(
                "Reserved bits set without a negotiated extension",
            ));
        }
        match opcode {
            0x3..=0x7 => {
                return Err(WebsocketError::protocol(format!(
                    "Use of reserved non-control frame opcode {opcode:#x}"
                )))
            }
            0xB..=0xF => {
                return Err(WebsocketError::protocol(format!(
                    "Use of reserved control frame opcode {opcode:#x}"
                )))
            }
            _ => {}
        }
        let opcode = FrameType::try_from(opcode).map_err(|e| {
            WebsocketError::protocol(format!("Invalid opcode {:#x}", e.0))
        })?;

        let length = match head[1] & LENGTH_BITS {
            126 => {
                let Some(ext) = self.read_exactly(2).await? else {
                    return Ok(None);
                };
                u64::from(u16::from_be_bytes([ext[0], ext[1]]))
            }
            127 => {
                let Some(ext) = self.read_exactly(8).await? else {
                    return Ok(None);
                };
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&ext);
                u64::from_be_bytes(bytes)
            }
            short => u64::from(short),
        };

        self.received_bytes = self.received_bytes.saturating_add(length);
        if self.received_bytes > self.max_payload_size {
            return Err(WebsocketError::too_large(format!(
                "Payload exceeded maximum allowed size of {} bytes",
                self.max_payload_size
            )));
        }

        let key = if masked {
            let Some(key) = self.read_exactly(4).await? else {
                return Ok(None);
            };
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        let payload = if length > 0 {
            let length = usize::try_from(length)
                .map_err(|_| WebsocketError::too_large("Payload length does not fit in memory"))?;
            let Some(payload) = self.read_exactly(length).await? else {
                return Ok(None);
            };
            match key {
                Some(key) => {
                    let mut payload = BytesMut::from(&payload[..]);
                    apply_mask(&mut payload, key);
                    payload.freeze()
                }
                None => payload,
            }
        } else {
            Bytes::new()
        };

        Ok(Some(Frame::new(opcode, payload, finished)))
    }

    /// Feed frames to `handler` until the stream ends, the socket closes
    /// or a frame is rejected.
    pub async fn run(&mut self, handler: &FrameHandler) -> Result<(), WebsocketError> {
        while let Some(frame) = self.next_frame().await? {
            handler.handle_frame(frame).await?;
            if self.socket.is_closed() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::tests::pair;
    use crate::websocket::{CloseCode, FrameCompiler};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn decodes_every_length_encoding() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let (socket, mut peer) = pair(256 * 1024);
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let wire = FrameCompiler.compile(FrameType::Binary, &payload, true, false);

            let writer = tokio::spawn(async move {
                peer.write_all(&wire).await.unwrap();
                peer
            });
            let mut parser = FrameParser::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
            let frame = parser.next_frame().await.unwrap().unwrap();
            writer.await.unwrap();

            assert!(frame.finished, "length {len}");
            assert_eq!(frame.opcode, FrameType::Binary);
            assert_eq!(&frame.payload[..], &payload[..], "length {len}");
        }
    }

    #[tokio::test]
    async fn unmasks_client_frames() {
        let (socket, mut peer) = pair(4096);
        let payload: Vec<u8> = (0..=255u8).collect();
        let wire = FrameCompiler.compile(FrameType::Binary, &payload, false, true);
        peer.write_all(&wire).await.unwrap();

        let mut parser = FrameParser::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
        let frame = parser.next_frame().await.unwrap().unwrap();
        assert!(!frame.finished);
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        let (socket, mut peer) = pair(4096);
        let wire = FrameCompiler.compile(FrameType::Text, b"Hello", true, true);
        let writer = tokio::spawn(async move {
            for byte in wire.iter() {
                peer.write_all(&[*byte]).await.unwrap();
                tokio::task::yield_now().await;
            }
            peer
        });

        let mut parser = FrameParser::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
        let frame = parser.next_frame().await.unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"Hello");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_reserved_opcodes_and_bits() {
        for head in [[0x83u8, 0x00], [0x8B, 0x00], [0xC1, 0x00]] {
            let (socket, mut peer) = pair(64);
            peer.write_all(&head).await.unwrap();

            let mut parser = FrameParser::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
            let err = parser.next_frame().await.unwrap_err();
            assert_eq!(err.close_code(), Some(CloseCode::ProtocolError), "head {head:?}");
        }
    }

    #[tokio::test]
    async fn payload_ceiling_is_cumulative() {
        let (socket, mut peer) = pair(4096);
        let mut wire = FrameCompiler.compile(FrameType::Binary, &[0u8; 60], true, false);
        wire.extend_from_slice(&FrameCompiler.compile(FrameType::Binary, &[0u8; 60], true, false));
        peer.write_all(&wire).await.unwrap();

        let mut parser = FrameParser::new(socket, 100);
        assert!(parser.next_frame().await.unwrap().is_some());
        let err = parser.next_frame().await.unwrap_err();
        assert_eq!(err.close_code(), Some(CloseCode::PayloadTooLarge));
    }

    #[tokio::test]
    async fn end_of_stream_yields_none() {
        let (socket, mut peer) = pair(64);
        peer.write_all(&[0x81]).await.unwrap();
        drop(peer);

        let mut parser = FrameParser::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
        assert!(parser.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_parser_produces_nothing() {
        let (socket, mut peer) = pair(64);
        peer.write_all(&FrameCompiler.compile(FrameType::Text, b"x", true, false))
            .await
            .unwrap();

        let mut parser = FrameParser::new(socket, MAX_PAYLOAD_SIZE_LIMIT);
        parser.cancel();
        assert!(parser.is_cancelled());
        assert!(parser.next_frame().await.unwrap().is_none());
    }
}
