use serde::{Deserialize, Serialize};

use super::{CodecError, Decoder, Encoder, ProtocolVersion};
use crate::packet::Packet;

/// Newline-delimited JSON codec.
///
/// Each frame is one line `{"v":<version>,"packet":{...}}`. Frames whose
/// version differs from the connection's are rejected.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_frame_len: usize,
}

impl JsonCodec {
    pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self::with_max_frame_len(Self::DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct FrameRef<'a> {
    v: u8,
    packet: &'a Packet,
}

#[derive(Deserialize)]
struct Frame {
    v: u8,
    packet: Packet,
}

impl Encoder for JsonCodec {
    fn encode(
        &self,
        version: ProtocolVersion,
        packet: &Packet,
        dst: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let start = dst.len();
        serde_json::to_writer(
            &mut *dst,
            &FrameRef {
                v: version.into(),
                packet,
            },
        )?;
        let size = dst.len() - start;
        if size > self.max_frame_len {
            dst.truncate(start);
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_len,
            });
        }
        dst.push(b'\n');
        Ok(())
    }
}

impl Decoder for JsonCodec {
    fn decode(
        &self,
        version: ProtocolVersion,
        src: &mut Vec<u8>,
    ) -> Result<Option<Packet>, CodecError> {
        loop {
            let Some(end) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_frame_len {
                    return Err(CodecError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_frame_len,
                    });
                }
                return Ok(None);
            };

            let line: Vec<u8> = src.drain(..=end).collect();
            let body = line[..end].trim_ascii();
            if body.is_empty() {
                continue;
            }

            let frame: Frame = serde_json::from_slice(body)
                .map_err(|e| CodecError::BadPacket(e.to_string()))?;
            if frame.v != u8::from(version) {
                return Err(CodecError::VersionMismatch {
                    expected: version,
                    actual: frame.v,
                });
            }
            return Ok(Some(frame.packet));
        }
    }
}
