//! The `session` module runs the protocol for one broker connection.
//!
//! A session is four tokio tasks that only talk through channels:
//!
//! - [`reader::Reader`] decodes inbound packets, sending PingResp signals to
//!   the keepalive monitor and everything else to the dispatcher.
//! - [`dispatcher::Dispatcher`] is the QoS state machine. It owns the
//!   correlation table and is also where application requests get their
//!   packet identifier before being handed to the writer.
//! - [`writer::Writer`] is the only task that writes to the transport. Its
//!   single input queue carries both application requests and protocol
//!   control packets, so packets go out in submission order and their bytes
//!   never interleave.
//! - [`keepalive::KeepaliveMonitor`] pings the broker and closes the
//!   transport when no response arrives in time.
//!
//! Closing the transport ([`CloseHandle::close`]) is the shutdown signal:
//! reader and writer drop their halves of the transport, and the dispatcher
//! and monitor stop once the reader has dropped their input channels.

pub mod dispatcher;
pub mod keepalive;
pub mod reader;
pub mod writer;

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, info_span, warn};
use uuid::Uuid;

use crate::codec::{Decoder, Encoder};
use crate::config::SessionConfig;
use crate::ids::{IdAllocator, IdPool};
use crate::packet::{Packet, Publish, QoS, TopicFilter};
use crate::persistence::{MemoryStore, PersistError, PersistKey, RedeliveryStore};
use crate::utils::error::SessionError;

pub use dispatcher::Dispatcher;
pub use keepalive::{KeepaliveMonitor, KeepaliveState};
pub use reader::Reader;
pub use writer::Writer;

/// Notification sent to the application.
#[derive(Debug)]
pub enum Event {
    /// An application publish was written to the transport.
    PublishSent { topic: String, qos: QoS },
    SubscribeSent { topics: Vec<TopicFilter> },
    UnsubscribeSent { topics: Vec<String> },

    /// The publish exchange is complete: PubAck for QoS 1, PubComp for QoS 2,
    /// the write itself for QoS 0.
    PublishConfirmed {
        topic: String,
        error: Option<SessionError>,
    },
    /// SubAck received; `topics` carry the QoS granted by the broker.
    SubscribeConfirmed {
        topics: Vec<TopicFilter>,
        error: Option<SessionError>,
    },
    UnsubscribeConfirmed {
        topics: Vec<String>,
        error: Option<SessionError>,
    },

    /// The redelivery store failed; the protocol carried on regardless.
    PersistenceError(PersistError),

    /// The reader stopped. `error` is `None` when the application closed the
    /// transport or Disconnect was sent.
    Disconnected { error: Option<SessionError> },
}

/// An item queued for the writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Originated by the application (Publish, Subscribe, Unsubscribe).
    Request(Packet),
    /// Protocol traffic generated by the session itself.
    Control(Packet),
    /// Delete a store entry after every item queued before it.
    Release(PersistKey),
}

impl Outgoing {
    pub fn packet(&self) -> Option<&Packet> {
        match self {
            Outgoing::Request(packet) | Outgoing::Control(packet) => Some(packet),
            Outgoing::Release(_) => None,
        }
    }
}

/// Application request handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Publish(Publish),
    Subscribe(Vec<TopicFilter>),
    Unsubscribe(Vec<String>),
    Disconnect,
}

/// Why the transport was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The application called [`SessionHandle::close`].
    Requested,
    /// Disconnect was sent.
    Disconnect,
    /// The broker did not answer a PingReq in time.
    KeepaliveTimeout,
    EncodeFailed,
    WriteFailed,
    /// The reader stopped: peer hangup, read or decode failure.
    ReadFailed,
}

impl CloseReason {
    /// Whether the session itself chose to close, as opposed to a failure.
    pub fn is_graceful(self) -> bool {
        matches!(self, CloseReason::Requested | CloseReason::Disconnect)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::Requested => "closed by application",
            CloseReason::Disconnect => "disconnected",
            CloseReason::KeepaliveTimeout => "keepalive timeout",
            CloseReason::EncodeFailed => "packet encoding failed",
            CloseReason::WriteFailed => "transport write failed",
            CloseReason::ReadFailed => "transport read failed",
        };
        f.write_str(reason)
    }
}

/// Shared transport-closure flag.
///
/// Closing is idempotent. The first close records its [`CloseReason`];
/// [`CloseHandle::close_with`] reports whether this call was the one that
/// closed the transport.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl CloseHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn close(&self) -> bool {
        self.close_with(CloseReason::Requested)
    }

    pub fn close_with(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(reason);
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CloseReason> {
        *self.tx.borrow()
    }

    /// Resolves once the transport is closed.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so waiting cannot fail
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(CloseReason::Requested),
            Err(_) => CloseReason::Requested,
        }
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receivers for everything the session delivers upward.
#[derive(Debug)]
pub struct SessionEvents {
    pub events: mpsc::UnboundedReceiver<Event>,
    /// Every inbound publish, whatever its QoS.
    pub inbox: mpsc::UnboundedReceiver<Publish>,
}

/// Builder for a session over an established transport.
pub struct Session<C> {
    config: SessionConfig,
    codec: C,
    store: Arc<dyn RedeliveryStore>,
    ids: Box<dyn IdAllocator>,
    span: Span,
}

impl<C> Session<C>
where
    C: Encoder + Decoder + Clone,
{
    /// A session with an in-memory store and a fresh identifier pool.
    pub fn new(config: SessionConfig, codec: C) -> Self {
        Self {
            config,
            codec,
            store: Arc::new(MemoryStore::new()),
            ids: Box::new(IdPool::new()),
            span: info_span!("session", id = %Uuid::new_v4()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RedeliveryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_id_allocator(mut self, ids: impl IdAllocator) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Parent span for every log line of this session.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Spawns the session tasks on the current tokio runtime.
    pub fn spawn<T>(self, io: T) -> (SessionHandle, SessionEvents)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let Session {
            config,
            codec,
            store,
            ids,
            span,
        } = self;

        let (read_half, write_half) = tokio::io::split(io);
        let close = CloseHandle::new();

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let writer = Writer::new(
            write_half,
            codec.clone(),
            config.protocol_version,
            store.clone(),
            event_tx.clone(),
            close.clone(),
        );
        let dispatcher = Dispatcher::new(ids, store, outgoing_tx.clone(), event_tx.clone(), inbox_tx);
        let reader = Reader::new(
            read_half,
            codec,
            config.protocol_version,
            close.clone(),
            event_tx,
        );
        let monitor = KeepaliveMonitor::new(&config, outgoing_tx, close.clone());

        let writer_task = tokio::spawn(
            writer
                .run(outgoing_rx)
                .instrument(info_span!(parent: &span, "writer")),
        );
        let dispatcher_task = tokio::spawn(
            dispatcher
                .run(inbound_rx, request_rx, config.resume)
                .instrument(info_span!(parent: &span, "dispatcher")),
        );
        let reader_task = tokio::spawn(
            reader
                .run(inbound_tx, ping_tx)
                .instrument(info_span!(parent: &span, "reader")),
        );
        let keepalive_task = tokio::spawn(
            monitor
                .run(ping_rx)
                .instrument(info_span!(parent: &span, "keepalive")),
        );

        let handle = SessionHandle {
            requests: request_tx,
            close,
            tasks: vec![reader_task, dispatcher_task, writer_task],
            keepalive: keepalive_task,
        };
        let events = SessionEvents {
            events: event_rx,
            inbox: inbox_rx,
        };
        (handle, events)
    }
}

/// Application side of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    close: CloseHandle,
    tasks: Vec<JoinHandle<()>>,
    keepalive: JoinHandle<KeepaliveState>,
}

impl SessionHandle {
    pub fn publish(
        &self,
        topic: impl Into<String>,
        qos: QoS,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), SessionError> {
        self.request(Request::Publish(Publish::new(topic, qos, payload)))
    }

    pub fn subscribe(&self, topics: Vec<TopicFilter>) -> Result<(), SessionError> {
        self.request(Request::Subscribe(topics))
    }

    pub fn unsubscribe(&self, topics: Vec<String>) -> Result<(), SessionError> {
        self.request(Request::Unsubscribe(topics))
    }

    /// Sends Disconnect after every previously queued packet, then closes the
    /// transport.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.request(Request::Disconnect)
    }

    /// Closes the transport without sending Disconnect.
    pub fn close(&self) -> bool {
        self.close.close()
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close.reason()
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    /// Waits for every session task to finish and returns the final state of
    /// the keepalive monitor.
    pub async fn join(self) -> KeepaliveState {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task failed");
            }
        }
        match self.keepalive.await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Keepalive task failed");
                KeepaliveState::Dead
            }
        }
    }

    fn request(&self, request: Request) -> Result<(), SessionError> {
        if self.close.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        self.requests
            .send(request)
            .map_err(|_| SessionError::SessionClosed)
    }
}

#[cfg(test)]
mod tests;
