//! Frame-level protocol rules for one connection.
//!
//! # Responsibilities
//! - Validate control frames and fragmentation sequencing
//! - Reassemble fragmented messages and queue completed ones
//! - Answer PING and CLOSE
//! - Turn protocol violations into a CLOSE frame carrying the matching code
//!
//! # Design Decisions
//! - `handle_frame` only ever runs inside the read task, except for the
//!   locally synthesised CLOSE used by `WebsocketClient::close`
//! - Control frames never touch the reassembly buffer

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::net::Socket;
use crate::observability::metrics;
use crate::websocket::frame::MAX_CONTROL_PAYLOAD;
use crate::websocket::{
    CloseCode, Frame, FrameCompiler, FrameParser, FrameType, Message, WebsocketError,
};

/// A fragmented message still being received.
#[derive(Debug)]
struct Fragment {
    opcode: FrameType,
    payload: BytesMut,
}

/// Applies the frame rules and owns the producing end of the message queue.
#[derive(Debug)]
pub struct FrameHandler {
    socket: Arc<Socket>,
    compiler: FrameCompiler,
    fragment: Mutex<Option<Fragment>>,
    messages: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl FrameHandler {
    /// Build a handler and the receiving end of its message queue.
    pub fn new(socket: Arc<Socket>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler = Self {
            socket,
            compiler: FrameCompiler::new(),
            fragment: Mutex::new(None),
            messages: Mutex::new(Some(sender)),
        };
        (handler, receiver)
    }

    /// Drive `parser` until the connection ends, then tear it down.
    pub async fn read(&self, parser: &mut FrameParser) {
        if let Err(e) = parser.run(self).await {
            match e.close_code() {
                Some(code) => {
                    tracing::warn!(
                        remote = %self.socket.remote_addr(),
                        code = code.as_u16(),
                        error = %e,
                        "WebSocket protocol violation"
                    );
                    metrics::record_protocol_error(code.as_u16());
                    let close = Frame::close(code, &e.to_string());
                    if let Err(e) = self.write(FrameType::Close, &close.payload, true).await {
                        tracing::trace!(error = %e, "Could not send close frame");
                    }
                }
                None => {
                    tracing::debug!(
                        remote = %self.socket.remote_addr(),
                        error = %e,
                        "WebSocket stream ended"
                    );
                }
            }
        }

        parser.cancel();
        self.finish();
        self.socket.close().await;
    }

    /// Encode one server frame and write it. Server frames are never masked.
    pub async fn write(
        &self,
        frame_type: FrameType,
        data: &[u8],
        finished: bool,
    ) -> Result<(), WebsocketError> {
        if self.socket.is_closed() {
            return Err(WebsocketError::Closed);
        }
        let frame = self.compiler.compile(frame_type, data, finished, false);
        self.socket.write(&frame).await?;
        Ok(())
    }

    /// Apply the frame rules to one frame.
    pub async fn handle_frame(&self, frame: Frame) -> Result<(), WebsocketError> {
        if frame.is_control() {
            if frame.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(WebsocketError::too_large(
                    "Control frame payload must not exceed 125 bytes",
                ));
            }
            if !frame.finished {
                return Err(WebsocketError::protocol(
                    "Control frames must not be fragmented",
                ));
            }
        }
        metrics::record_frame(frame.opcode.as_str());

        if !frame.finished {
            return self.buffer_fragment(frame);
        }

        match frame.opcode {
            FrameType::Close => {
                if let Err(e) = self.write(FrameType::Close, &frame.payload, true).await {
                    tracing::trace!(error = %e, "Could not echo close frame");
                }
                self.finish();
                self.socket.close().await;
                Ok(())
            }
            FrameType::Ping => self.write(FrameType::Pong, &frame.payload, true).await,
            FrameType::Pong => Ok(()),
            FrameType::Text | FrameType::Binary | FrameType::Continuation => {
                let (opcode, payload) = self.complete_message(frame)?;
                let message = match opcode {
                    FrameType::Text => Message::Text(String::from_utf8(payload.to_vec()).map_err(
                        |_| {
                            WebsocketError::with_code(
                                CloseCode::DataTypeMismatch,
                                "Text message is not valid UTF-8",
                            )
                        },
                    )?),
                    _ => Message::Binary(payload),
                };
                if let Some(sender) = lock(&self.messages).as_ref() {
                    // The application may have stopped listening.
                    let _ = sender.send(message);
                }
                Ok(())
            }
        }
    }

    /// Close the message queue and drop any partial message.
    pub fn finish(&self) {
        lock(&self.messages).take();
        lock(&self.fragment).take();
    }

    fn buffer_fragment(&self, frame: Frame) -> Result<(), WebsocketError> {
        let mut fragment = lock(&self.fragment);
        match (frame.opcode, fragment.as_mut()) {
            (FrameType::Continuation, Some(open)) => {
                open.payload.extend_from_slice(&frame.payload);
                Ok(())
            }
            (FrameType::Continuation, None) => Err(WebsocketError::protocol(
                "Continuation frame without a message in progress",
            )),
            (opcode, None) => {
                *fragment = Some(Fragment {
                    opcode,
                    payload: BytesMut::from(&frame.payload[..]),
                });
                Ok(())
            }
            (_, Some(_)) => Err(WebsocketError::protocol(
                "New message started before the fragmented message finished",
            )),
        }
    }

    /// Join a final data frame with any buffered fragments.
    fn complete_message(&self, frame: Frame) -> Result<(FrameType, Bytes), WebsocketError> {
        let mut fragment = lock(&self.fragment);
        match (frame.opcode, fragment.take()) {
            (FrameType::Continuation, Some(mut open)) => {
                open.payload.extend_from_slice(&frame.payload);
                Ok((open.opcode, open.payload.freeze()))
            }
            (FrameType::Continuation, None) => Err(WebsocketError::protocol(
                "Continuation frame without a message in progress",
            )),
            (opcode, None) => Ok((opcode, frame.payload)),
            (_, Some(_)) => Err(WebsocketError::protocol(
                "New message started before the fragmented message finished",
            )),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
