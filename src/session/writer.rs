use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace};

use super::{CloseHandle, CloseReason, Event, Outgoing};
use crate::codec::{Encoder, ProtocolVersion};
use crate::packet::{Packet, QoS};
use crate::persistence::{PersistKey, RedeliveryStore};

/// Single point of egress onto the transport.
///
/// Every packet is encoded into one buffer and written with a single
/// `write_all` followed by a flush before the next packet is taken from the
/// queue. [`Outgoing::Release`] items write nothing; they delete a store entry
/// in queue order.
pub struct Writer<W, E> {
    io: W,
    encoder: E,
    version: ProtocolVersion,
    store: Arc<dyn RedeliveryStore>,
    events: UnboundedSender<Event>,
    close: CloseHandle,
}

impl<W, E> Writer<W, E>
where
    W: AsyncWrite + Unpin + Send + 'static,
    E: Encoder,
{
    pub fn new(
        io: W,
        encoder: E,
        version: ProtocolVersion,
        store: Arc<dyn RedeliveryStore>,
        events: UnboundedSender<Event>,
        close: CloseHandle,
    ) -> Self {
        Self {
            io,
            encoder,
            version,
            store,
            events,
            close,
        }
    }

    /// Writes queued packets until the queue closes, the transport is closed,
    /// a write fails or a Disconnect has been sent.
    pub async fn run(mut self, mut queue: UnboundedReceiver<Outgoing>) {
        let close = self.close.clone();
        let mut buf = Vec::new();

        loop {
            let outgoing = tokio::select! {
                biased;
                _ = close.closed() => {
                    debug!("Transport closed, stopping writer");
                    break;
                }
                next = queue.recv() => match next {
                    Some(outgoing) => outgoing,
                    None => {
                        debug!("Outgoing queue closed, stopping writer");
                        break;
                    }
                },
            };

            let packet = match &outgoing {
                Outgoing::Request(packet) | Outgoing::Control(packet) => packet,
                Outgoing::Release(key) => {
                    self.release(*key);
                    continue;
                }
            };

            buf.clear();
            if let Err(e) = self.encoder.encode(self.version, packet, &mut buf) {
                error!(error = %e, packet_type = %packet.packet_type(), "Failed to encode packet");
                close.close_with(CloseReason::EncodeFailed);
                break;
            }

            let written = tokio::select! {
                _ = close.closed() => break,
                res = self.write(&buf) => res,
            };
            if let Err(e) = written {
                error!(error = %e, "Failed to write to transport");
                close.close_with(CloseReason::WriteFailed);
                break;
            }
            trace!(packet_type = %packet.packet_type(), bytes = buf.len(), "Packet flushed");

            if self.after_flush(outgoing).await {
                break;
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.io.write_all(bytes).await?;
        self.io.flush().await
    }

    /// Post-send bookkeeping. Returns `true` when the writer must stop.
    async fn after_flush(&mut self, outgoing: Outgoing) -> bool {
        match outgoing {
            Outgoing::Request(Packet::Publish(publish)) => {
                self.emit(Event::PublishSent {
                    topic: publish.topic.clone(),
                    qos: publish.qos,
                });
                if publish.qos == QoS::AtMostOnce {
                    self.emit(Event::PublishConfirmed {
                        topic: publish.topic,
                        error: None,
                    });
                }
            }
            Outgoing::Request(Packet::Subscribe(subscribe)) => {
                self.emit(Event::SubscribeSent {
                    topics: subscribe.topics,
                });
            }
            Outgoing::Request(Packet::Unsubscribe(unsubscribe)) => {
                self.emit(Event::UnsubscribeSent {
                    topics: unsubscribe.topics,
                });
            }
            Outgoing::Control(packet @ Packet::PubRel { packet_id }) => {
                if let Err(e) = self.store.store(PersistKey::send(packet_id), &packet) {
                    self.emit(Event::PersistenceError(e));
                }
            }
            Outgoing::Control(Packet::Disconnect) => {
                info!("Disconnect sent, closing transport");
                if let Err(e) = self.io.shutdown().await {
                    debug!(error = %e, "Transport shutdown failed");
                }
                self.close.close_with(CloseReason::Disconnect);
                return true;
            }
            Outgoing::Request(_) | Outgoing::Control(_) | Outgoing::Release(_) => {}
        }
        false
    }

    fn release(&self, key: PersistKey) {
        trace!(%key, "Releasing store entry");
        if let Err(e) = self.store.delete(key) {
            self.emit(Event::PersistenceError(e));
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}
