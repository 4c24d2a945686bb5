//! The `error` module defines the errors surfaced by a session.
//!
//! Component-specific errors live next to their component
//! ([`CodecError`], [`PersistError`], [`ConfigError`]); [`SessionError`] is
//! what the application sees on upward events and from the session handle.

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::persistence::PersistError;
use crate::session::CloseReason;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Every packet identifier is held by an unacknowledged exchange.
    #[error("no packet identifier available")]
    NoPacketIdAvailable,

    #[error("broker rejected subscription to {topics:?}")]
    SubscribeRejected { topics: Vec<String> },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("session is closed")]
    SessionClosed,

    /// The session closed the transport after a local failure.
    #[error("transport closed: {0}")]
    Closed(CloseReason),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
