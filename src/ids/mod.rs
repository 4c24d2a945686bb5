//! Packet identifier allocation and the correlation table.
//!
//! An [`IdAllocator`] hands out identifiers for tracked requests and remembers
//! which outgoing packet each identifier belongs to, so acknowledgments can be
//! matched back to their request. The session's dispatcher task is the only
//! owner of its allocator.

use std::collections::HashMap;

use crate::packet::{Packet, PacketId};

pub trait IdAllocator: Send + 'static {
    /// Reserves an unused identifier, or `None` when every identifier is in use.
    fn allocate(&mut self) -> Option<PacketId>;

    /// Records `packet` as the request tracked under `id`, reserving `id` if it
    /// was not allocated yet.
    fn associate(&mut self, id: PacketId, packet: Packet);

    fn lookup(&self, id: PacketId) -> Option<&Packet>;

    /// Frees `id` for reuse and returns the packet that was tracked under it.
    fn release(&mut self, id: PacketId) -> Option<Packet>;
}

/// Sequential allocator over `1..=max_id`.
///
/// Identifiers are handed out round-robin starting after the last one issued,
/// which keeps a just-released identifier from being reused immediately.
#[derive(Debug)]
pub struct IdPool {
    in_use: HashMap<PacketId, Option<Packet>>,
    next: PacketId,
    max_id: PacketId,
}

impl IdPool {
    pub fn new() -> Self {
        Self::with_max_id(PacketId::MAX)
    }

    /// Limits the pool to identifiers `1..=max_id`. `max_id` is raised to 1 if
    /// zero is passed.
    pub fn with_max_id(max_id: PacketId) -> Self {
        Self {
            in_use: HashMap::new(),
            next: 1,
            max_id: max_id.max(1),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_use.len()
    }

    fn successor(&self, id: PacketId) -> PacketId {
        if id >= self.max_id { 1 } else { id + 1 }
    }
}

impl Default for IdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for IdPool {
    fn allocate(&mut self) -> Option<PacketId> {
        if self.in_use.len() >= usize::from(self.max_id) {
            return None;
        }

        let mut candidate = self.next;
        while self.in_use.contains_key(&candidate) {
            candidate = self.successor(candidate);
        }

        self.in_use.insert(candidate, None);
        self.next = self.successor(candidate);
        Some(candidate)
    }

    fn associate(&mut self, id: PacketId, packet: Packet) {
        self.in_use.insert(id, Some(packet));
    }

    fn lookup(&self, id: PacketId) -> Option<&Packet> {
        self.in_use.get(&id).and_then(Option::as_ref)
    }

    fn release(&mut self, id: PacketId) -> Option<Packet> {
        self.in_use.remove(&id).flatten()
    }
}
