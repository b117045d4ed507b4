//! Frame encoder.

use bytes::{BufMut, BytesMut};

use crate::websocket::mask::apply_mask;
use crate::websocket::FrameType;

const FIN_BIT: u8 = 0b1000_0000;
const MASK_BIT: u8 = 0b1000_0000;

/// Encodes frames into wire bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCompiler;

impl FrameCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Encode one frame. A random key is drawn when `use_masking` is set.
    pub fn compile(
        &self,
        frame_type: FrameType,
        data: &[u8],
        finished: bool,
        use_masking: bool,
    ) -> BytesMut {
        let key = use_masking.then(rand::random::<[u8; 4]>);
        self.compile_with_mask(frame_type, data, finished, key)
    }

    /// Encode one frame, masking the payload with `key` if given.
    pub fn compile_with_mask(
        &self,
        frame_type: FrameType,
        data: &[u8],
        finished: bool,
        key: Option<[u8; 4]>,
    ) -> BytesMut {
        let mask_bit = if key.is_some() { MASK_BIT } else { 0 };
        let mut buf = BytesMut::with_capacity(14 + data.len());

        let fin = if finished { FIN_BIT } else { 0 };
        buf.put_u8(fin | frame_type as u8);
        match data.len() {
            len @ 0..=125 => buf.put_u8(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(len as u64);
            }
        }

        match key {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(data);
                apply_mask(&mut buf[start..], key);
            }
            None => buf.put_slice(data),
        }
        buf
    }
}
