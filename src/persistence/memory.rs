use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{Direction, PersistError, PersistKey, RedeliveryStore, StoredEntry};
use crate::packet::Packet;

/// Store kept in process memory. Entries do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<PersistKey, Packet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: PersistKey) -> Option<Packet> {
        self.lock().ok()?.get(&key).cloned()
    }

    pub fn contains(&self, key: PersistKey) -> bool {
        self.lock().map(|e| e.contains_key(&key)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<PersistKey, Packet>>, PersistError> {
        self.entries.lock().map_err(|_| PersistError::Poisoned)
    }
}

impl RedeliveryStore for MemoryStore {
    fn store(&self, key: PersistKey, packet: &Packet) -> Result<(), PersistError> {
        self.lock()?.insert(key, packet.clone());
        Ok(())
    }

    fn delete(&self, key: PersistKey) -> Result<(), PersistError> {
        self.lock()?.remove(&key);
        Ok(())
    }

    fn range(&self, direction: Direction) -> Result<Vec<StoredEntry>, PersistError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(key, _)| key.direction == direction)
            .map(|(key, packet)| (key.packet_id, Ok(packet.clone())))
            .collect())
    }
}
