use sled::Db;
use tracing::warn;

use super::{Direction, PersistError, PersistKey, RedeliveryStore, StoredEntry, StoredPacket};
use crate::packet::Packet;

/// Store backed by a `sled` database.
///
/// Keys are the three byte [`PersistKey`] encoding, so a prefix scan on the
/// direction tag yields one direction in packet id order. Values are JSON
/// encoded [`StoredPacket`] records.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, PersistError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn load(&self, key: PersistKey) -> Result<Option<StoredPacket>, PersistError> {
        match self.db.get(key.to_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Forces buffered writes to disk.
    pub fn flush(&self) -> Result<(), PersistError> {
        self.db.flush()?;
        Ok(())
    }
}

impl RedeliveryStore for SledStore {
    fn store(&self, key: PersistKey, packet: &Packet) -> Result<(), PersistError> {
        let serialized = serde_json::to_vec(&StoredPacket::new(packet.clone()))?;
        self.db.insert(key.to_bytes(), serialized)?;
        Ok(())
    }

    fn delete(&self, key: PersistKey) -> Result<(), PersistError> {
        self.db.remove(key.to_bytes())?;
        Ok(())
    }

    fn range(&self, direction: Direction) -> Result<Vec<StoredEntry>, PersistError> {
        let prefix = PersistKey {
            direction,
            packet_id: 0,
        }
        .to_bytes();

        let mut entries = Vec::new();
        for entry in self.db.scan_prefix(&prefix[..1]) {
            let (key_bytes, value) = entry?;
            let key = match PersistKey::from_bytes(&key_bytes) {
                Ok(key) => key,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable key in redelivery store");
                    continue;
                }
            };
            let packet = serde_json::from_slice::<StoredPacket>(&value)
                .map(|stored| stored.packet)
                .map_err(PersistError::from);
            entries.push((key.packet_id, packet));
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("entries", &self.db.len())
            .finish()
    }
}
