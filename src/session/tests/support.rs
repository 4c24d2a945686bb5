use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

use crate::codec::json::JsonCodec;
use crate::codec::{Decoder, Encoder, ProtocolVersion};
use crate::config::SessionConfig;
use crate::packet::{Packet, PacketType};
use crate::persistence::{
    Direction, MemoryStore, PersistError, PersistKey, RedeliveryStore, StoredEntry,
};
use crate::session::{Event, Session, SessionEvents, SessionHandle};

pub const WAIT: Duration = Duration::from_secs(30);

/// Broker side of an in-memory transport.
pub struct FakeBroker {
    io: DuplexStream,
    codec: JsonCodec,
    buf: Vec<u8>,
}

impl FakeBroker {
    pub fn new(io: DuplexStream) -> Self {
        Self {
            io,
            codec: JsonCodec::new(),
            buf: Vec::new(),
        }
    }

    pub async fn recv(&mut self) -> Packet {
        timeout(WAIT, async {
            loop {
                if let Some(packet) = self
                    .codec
                    .decode(ProtocolVersion::V311, &mut self.buf)
                    .expect("client sent an undecodable frame")
                {
                    return packet;
                }
                let n = self.io.read_buf(&mut self.buf).await.expect("broker read");
                assert_ne!(n, 0, "client closed the transport");
            }
        })
        .await
        .expect("timed out waiting for a packet")
    }

    pub async fn send(&mut self, packet: Packet) {
        let mut out = Vec::new();
        self.codec
            .encode(ProtocolVersion::V311, &packet, &mut out)
            .expect("encode");
        self.send_raw(&out).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.expect("broker write");
        self.io.flush().await.expect("broker flush");
    }

    /// Asserts that the client sends nothing more and closes the transport.
    pub async fn expect_eof(&mut self) {
        let leftover = timeout(WAIT, async {
            let mut rest = Vec::new();
            self.io.read_to_end(&mut rest).await.expect("broker read");
            rest
        })
        .await
        .expect("timed out waiting for the client to close");
        assert!(
            self.buf.is_empty() && leftover.is_empty(),
            "unexpected trailing bytes: {:?}",
            String::from_utf8_lossy(&leftover)
        );
    }
}

pub fn no_keepalive() -> SessionConfig {
    SessionConfig::new(Duration::ZERO, 1.0).expect("valid config")
}

pub fn start(session: Session<JsonCodec>) -> (SessionHandle, SessionEvents, FakeBroker) {
    let (client, server) = tokio::io::duplex(4096);
    let (handle, events) = session.spawn(client);
    (handle, events, FakeBroker::new(server))
}

pub async fn next_event(events: &mut SessionEvents) -> Event {
    timeout(WAIT, events.events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collects every remaining event up to and including `Disconnected`.
pub async fn drain_until_disconnected(events: &mut SessionEvents) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = matches!(event, Event::Disconnected { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Store(PersistKey, PacketType),
    Delete(PersistKey),
}

/// Memory store that records every operation.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    ops: Mutex<Vec<StoreOp>>,
    unreadable: Mutex<Vec<PersistKey>>,
}

impl RecordingStore {
    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn get(&self, key: PersistKey) -> Option<Packet> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: PersistKey) -> bool {
        self.inner.contains(key)
    }

    /// Seeds an entry whose value cannot be decoded when ranged over.
    pub fn seed_unreadable(&self, key: PersistKey) {
        self.inner
            .store(key, &Packet::PingReq)
            .expect("seed unreadable entry");
        self.unreadable.lock().unwrap().push(key);
    }
}

impl RedeliveryStore for RecordingStore {
    fn store(&self, key: PersistKey, packet: &Packet) -> Result<(), PersistError> {
        self.ops
            .lock()
            .unwrap()
            .push(StoreOp::Store(key, packet.packet_type()));
        self.inner.store(key, packet)
    }

    fn delete(&self, key: PersistKey) -> Result<(), PersistError> {
        self.ops.lock().unwrap().push(StoreOp::Delete(key));
        self.unreadable.lock().unwrap().retain(|k| *k != key);
        self.inner.delete(key)
    }

    fn range(&self, direction: Direction) -> Result<Vec<StoredEntry>, PersistError> {
        let unreadable = self.unreadable.lock().unwrap().clone();
        let entries = self.inner.range(direction)?;
        Ok(entries
            .into_iter()
            .map(|(id, packet)| {
                let key = PersistKey { direction, packet_id: id };
                if unreadable.contains(&key) {
                    (id, Err(PersistError::Other(format!("undecodable value at {key}"))))
                } else {
                    (id, packet)
                }
            })
            .collect())
    }
}

/// Store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

impl RedeliveryStore for FailingStore {
    fn store(&self, key: PersistKey, _packet: &Packet) -> Result<(), PersistError> {
        Err(PersistError::Other(format!("disk full writing {key}")))
    }

    fn delete(&self, key: PersistKey) -> Result<(), PersistError> {
        Err(PersistError::Other(format!("disk full deleting {key}")))
    }

    fn range(&self, _direction: Direction) -> Result<Vec<StoredEntry>, PersistError> {
        Err(PersistError::Other("disk full".to_string()))
    }
}

pub fn shared<S: RedeliveryStore>(store: &Arc<S>) -> Arc<dyn RedeliveryStore> {
    store.clone()
}
