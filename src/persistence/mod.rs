//! The `persistence` module keeps a durable record of in-flight exchanges.
//!
//! Outgoing requests that still wait for an acknowledgment are stored under a
//! send-direction key, inbound QoS 2 publishes that are not yet released are
//! stored under a recv-direction key. After a reconnect the send-direction
//! entries are what the session resends.
//!
//! Two stores are provided: [`memory::MemoryStore`] for tests and short-lived
//! sessions, and [`sled_store::SledStore`] backed by an embedded `sled`
//! database.

pub mod memory;
pub mod sled_store;

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{PersistenceSettings, StoreBackend};
use crate::packet::{Packet, PacketId};

pub use memory::MemoryStore;
pub use sled_store::SledStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    fn tag(self) -> u8 {
        match self {
            Direction::Send => b's',
            Direction::Recv => b'r',
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b's' => Some(Direction::Send),
            b'r' => Some(Direction::Recv),
            _ => None,
        }
    }
}

/// Key of a persisted exchange.
///
/// Send and recv keys for the same identifier are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PersistKey {
    pub direction: Direction,
    pub packet_id: PacketId,
}

impl PersistKey {
    pub fn send(packet_id: PacketId) -> Self {
        Self {
            direction: Direction::Send,
            packet_id,
        }
    }

    pub fn recv(packet_id: PacketId) -> Self {
        Self {
            direction: Direction::Recv,
            packet_id,
        }
    }

    /// Three byte encoding: direction tag followed by the big-endian id.
    pub fn to_bytes(self) -> [u8; 3] {
        let [hi, lo] = self.packet_id.to_be_bytes();
        [self.direction.tag(), hi, lo]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistError> {
        match bytes {
            [tag, hi, lo] => {
                let direction = Direction::from_tag(*tag)
                    .ok_or_else(|| PersistError::CorruptKey(bytes.to_vec()))?;
                Ok(Self {
                    direction,
                    packet_id: PacketId::from_be_bytes([*hi, *lo]),
                })
            }
            _ => Err(PersistError::CorruptKey(bytes.to_vec())),
        }
    }
}

impl fmt::Display for PersistKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Send => "send",
            Direction::Recv => "recv",
        };
        write!(f, "{dir}/{}", self.packet_id)
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("failed to (de)serialize stored packet: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt persistence key: {0:?}")]
    CorruptKey(Vec<u8>),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Other(String),
}

/// Value written for every persisted exchange.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredPacket {
    pub packet: Packet,
    pub stored_at: i64,
}

impl StoredPacket {
    pub fn new(packet: Packet) -> Self {
        Self {
            packet,
            stored_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Durable record of in-flight exchanges.
///
/// Implementations must be usable from several session tasks at once.
pub trait RedeliveryStore: Send + Sync + 'static {
    /// Inserts or overwrites the entry for `key`.
    fn store(&self, key: PersistKey, packet: &Packet) -> Result<(), PersistError>;

    /// Removes the entry for `key`. Removing a missing entry is not an error.
    fn delete(&self, key: PersistKey) -> Result<(), PersistError>;

    /// All entries of one direction, ordered by packet id.
    ///
    /// The outer error means the store could not be read at all. A single
    /// value that cannot be decoded is reported in its own entry.
    fn range(&self, direction: Direction) -> Result<Vec<StoredEntry>, PersistError>;
}

/// One entry returned by [`RedeliveryStore::range`].
pub type StoredEntry = (PacketId, Result<Packet, PersistError>);

/// Builds the store selected by the persistence settings.
pub fn open(settings: &PersistenceSettings) -> Result<Arc<dyn RedeliveryStore>, PersistError> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sled => Ok(Arc::new(SledStore::open(&settings.path)?)),
    }
}
