//! The `codec` module defines the seam between the session engine and the
//! byte-level packet format.
//!
//! The session never looks at bytes itself: the reader hands its receive
//! buffer to a [`Decoder`] and the writer asks an [`Encoder`] to fill a
//! buffer for exactly one packet. Both are told which protocol version the
//! connection negotiated.
//!
//! [`json::JsonCodec`] is a newline-delimited JSON format used for tests and
//! debugging peers; it is not the broker wire format.

pub mod json;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::packet::Packet;

/// Protocol revision spoken on the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProtocolVersion {
    V31 = 3,
    #[default]
    V311 = 4,
    V5 = 5,
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        version as u8
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(ProtocolVersion::V31),
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolVersion::V31 => "3.1",
            ProtocolVersion::V311 => "3.1.1",
            ProtocolVersion::V5 => "5.0",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed packet: {0}")]
    BadPacket(String),

    #[error("packet encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        expected: ProtocolVersion,
        actual: u8,
    },

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// Serializes one packet.
pub trait Encoder: Send + Sync + 'static {
    /// Appends the encoding of `packet` to `dst`.
    fn encode(
        &self,
        version: ProtocolVersion,
        packet: &Packet,
        dst: &mut Vec<u8>,
    ) -> Result<(), CodecError>;
}

/// Deserializes one packet at a time from a receive buffer.
pub trait Decoder: Send + Sync + 'static {
    /// Removes the first complete packet from `src` and returns it.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a complete packet; the
    /// caller reads more bytes and tries again.
    fn decode(
        &self,
        version: ProtocolVersion,
        src: &mut Vec<u8>,
    ) -> Result<Option<Packet>, CodecError>;
}
