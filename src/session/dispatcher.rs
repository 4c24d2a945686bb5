//! Packet dispatcher and QoS engine.
//!
//! The dispatcher consumes inbound packets in wire order and drives the
//! acknowledgment handshakes:
//!
//! | inbound   | tracked entry      | action                                         |
//! |-----------|--------------------|------------------------------------------------|
//! | SubAck    | Subscribe          | copy granted QoS, confirm, free id, delete     |
//! | UnsubAck  | Unsubscribe        | confirm, free id, delete                       |
//! | Publish   | -                  | inbox; QoS 1: PubAck, QoS 2: PubRec; store recv |
//! | PubAck    | Publish QoS 1      | confirm, free id, delete                       |
//! | PubRec    | Publish QoS 2      | PubRel (id stays allocated)                    |
//! | PubRel    | -                  | PubComp, delete recv                           |
//! | PubComp   | Publish QoS 2      | confirm, free id, delete through the writer    |
//!
//! Acknowledgments for identifiers that are not tracked, or tracked for a
//! different kind of request, change nothing. A failing redelivery store is
//! reported as [`Event::PersistenceError`] and never stops the handshake.

use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use super::{Event, Outgoing, Request};
use crate::ids::IdAllocator;
use crate::packet::{
    Packet, PacketId, PacketType, Publish, QoS, SubAck, Subscribe, SubscribeReturnCode,
    TopicFilter, Unsubscribe,
};
use crate::persistence::{Direction, PersistKey, RedeliveryStore};
use crate::utils::error::SessionError;

pub struct Dispatcher {
    ids: Box<dyn IdAllocator>,
    store: Arc<dyn RedeliveryStore>,
    outgoing: UnboundedSender<Outgoing>,
    events: UnboundedSender<Event>,
    inbox: UnboundedSender<Publish>,
}

impl Dispatcher {
    pub fn new(
        ids: Box<dyn IdAllocator>,
        store: Arc<dyn RedeliveryStore>,
        outgoing: UnboundedSender<Outgoing>,
        events: UnboundedSender<Event>,
        inbox: UnboundedSender<Publish>,
    ) -> Self {
        Self {
            ids,
            store,
            outgoing,
            events,
            inbox,
        }
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> &dyn IdAllocator {
        &*self.ids
    }

    /// Processes inbound packets and application requests until the reader
    /// drops the inbound channel.
    pub async fn run(
        mut self,
        mut inbound: UnboundedReceiver<Packet>,
        mut requests: UnboundedReceiver<Request>,
        resume: bool,
    ) {
        if resume {
            self.resume();
        }

        let mut requests_open = true;
        loop {
            tokio::select! {
                biased;
                packet = inbound.recv() => match packet {
                    Some(packet) => self.handle_packet(packet),
                    None => {
                        debug!("Inbound channel closed, stopping dispatcher");
                        break;
                    }
                },
                request = requests.recv(), if requests_open => match request {
                    Some(request) => self.handle_request(request),
                    None => requests_open = false,
                },
            }
        }
    }

    pub fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::SubAck(ack) => self.on_suback(ack),
            Packet::UnsubAck { packet_id } => self.on_unsuback(packet_id),
            Packet::Publish(publish) => self.on_publish(publish),
            Packet::PubAck { packet_id } => self.on_puback(packet_id),
            Packet::PubRec { packet_id } => self.on_pubrec(packet_id),
            Packet::PubRel { packet_id } => self.on_pubrel(packet_id),
            Packet::PubComp { packet_id } => self.on_pubcomp(packet_id),
            unexpected @ (Packet::Connect(_)
            | Packet::ConnAck(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::PingReq
            | Packet::PingResp
            | Packet::Disconnect) => {
                debug!(packet_type = %unexpected.packet_type(), "Dropping unexpected inbound packet");
            }
        }
    }

    pub fn handle_request(&mut self, request: Request) {
        match request {
            Request::Publish(mut publish) => {
                if publish.qos == QoS::AtMostOnce {
                    publish.packet_id = None;
                    self.send(Outgoing::Request(Packet::Publish(publish)));
                    return;
                }
                let Some(id) = self.ids.allocate() else {
                    warn!(topic = %publish.topic, "No packet id available for publish");
                    self.emit(Event::PublishConfirmed {
                        topic: publish.topic,
                        error: Some(SessionError::NoPacketIdAvailable),
                    });
                    return;
                };
                publish.packet_id = Some(id);
                self.track(id, Packet::Publish(publish));
            }
            Request::Subscribe(topics) => {
                let Some(id) = self.ids.allocate() else {
                    warn!("No packet id available for subscribe");
                    self.emit(Event::SubscribeConfirmed {
                        topics,
                        error: Some(SessionError::NoPacketIdAvailable),
                    });
                    return;
                };
                self.track(
                    id,
                    Packet::Subscribe(Subscribe {
                        packet_id: id,
                        topics,
                    }),
                );
            }
            Request::Unsubscribe(topics) => {
                let Some(id) = self.ids.allocate() else {
                    warn!("No packet id available for unsubscribe");
                    self.emit(Event::UnsubscribeConfirmed {
                        topics,
                        error: Some(SessionError::NoPacketIdAvailable),
                    });
                    return;
                };
                self.track(
                    id,
                    Packet::Unsubscribe(Unsubscribe {
                        packet_id: id,
                        topics,
                    }),
                );
            }
            Request::Disconnect => self.send(Outgoing::Control(Packet::Disconnect)),
        }
    }

    /// Re-tracks and resends every send-direction entry left in the store by a
    /// previous connection.
    pub fn resume(&mut self) {
        let entries = match self.store.range(Direction::Send) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to load pending exchanges");
                self.emit(Event::PersistenceError(e));
                return;
            }
        };
        debug!(count = entries.len(), "Resuming pending exchanges");

        for (id, entry) in entries {
            let packet = match entry {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(packet_id = id, error = %e, "Discarding unreadable pending exchange");
                    self.emit(Event::PersistenceError(e));
                    self.delete(PersistKey::send(id));
                    continue;
                }
            };
            match packet {
                Packet::Publish(mut publish) => {
                    publish.packet_id = Some(id);
                    publish.dup = true;
                    let packet = Packet::Publish(publish);
                    self.ids.associate(id, packet.clone());
                    self.send(Outgoing::Request(packet));
                }
                packet @ (Packet::Subscribe(_) | Packet::Unsubscribe(_)) => {
                    self.ids.associate(id, packet.clone());
                    self.send(Outgoing::Request(packet));
                }
                Packet::PubRel { .. } => {
                    let packet = Packet::PubRel { packet_id: id };
                    self.ids.associate(id, packet.clone());
                    self.send(Outgoing::Control(packet));
                }
                other => {
                    warn!(packet_id = id, packet_type = %other.packet_type(), "Discarding entry that cannot be resumed");
                    self.delete(PersistKey::send(id));
                }
            }
        }
    }

    fn on_suback(&mut self, ack: SubAck) {
        let id = ack.packet_id;
        let Some(Packet::Subscribe(mut subscribe)) =
            self.take_if(id, |p| matches!(p, Packet::Subscribe(_)))
        else {
            self.ignore(PacketType::SubAck, id);
            return;
        };

        let mut rejected = Vec::new();
        for (topic, code) in subscribe.topics.iter_mut().zip(&ack.codes) {
            match code {
                SubscribeReturnCode::Granted(qos) => topic.qos = *qos,
                SubscribeReturnCode::Failure => rejected.push(topic.name.clone()),
            }
        }
        debug!(packet_id = id, granted = ?granted(&subscribe.topics), "Subscribe acknowledged");

        let error = (!rejected.is_empty()).then(|| SessionError::SubscribeRejected { topics: rejected });
        self.emit(Event::SubscribeConfirmed {
            topics: subscribe.topics,
            error,
        });
        self.delete(PersistKey::send(id));
    }

    fn on_unsuback(&mut self, id: PacketId) {
        let Some(Packet::Unsubscribe(unsubscribe)) =
            self.take_if(id, |p| matches!(p, Packet::Unsubscribe(_)))
        else {
            self.ignore(PacketType::UnsubAck, id);
            return;
        };

        debug!(packet_id = id, "Unsubscribe acknowledged");
        self.emit(Event::UnsubscribeConfirmed {
            topics: unsubscribe.topics,
            error: None,
        });
        self.delete(PersistKey::send(id));
    }

    fn on_publish(&mut self, publish: Publish) {
        let qos = publish.qos;
        let packet_id = publish.packet_id;
        trace!(topic = %publish.topic, %qos, ?packet_id, "Inbound publish");

        let stored = (qos > QoS::AtMostOnce).then(|| Packet::Publish(publish.clone()));
        if self.inbox.send(publish).is_err() {
            trace!("Inbox receiver dropped");
        }

        let (Some(stored), Some(id)) = (stored, packet_id) else {
            if qos > QoS::AtMostOnce {
                warn!(%qos, "Inbound publish without packet id, not acknowledged");
            }
            return;
        };

        let reply = match qos {
            QoS::AtLeastOnce => Packet::PubAck { packet_id: id },
            QoS::ExactlyOnce => Packet::PubRec { packet_id: id },
            QoS::AtMostOnce => return,
        };
        self.send(Outgoing::Control(reply));
        self.store(PersistKey::recv(id), &stored);
    }

    fn on_puback(&mut self, id: PacketId) {
        let Some(Packet::Publish(publish)) = self.take_if(id, |p| is_publish_with_qos(p, QoS::AtLeastOnce))
        else {
            self.ignore(PacketType::PubAck, id);
            return;
        };

        debug!(packet_id = id, topic = %publish.topic, "Publish acknowledged");
        self.emit(Event::PublishConfirmed {
            topic: publish.topic,
            error: None,
        });
        self.delete(PersistKey::send(id));
    }

    fn on_pubrec(&mut self, id: PacketId) {
        let awaiting_release = self.ids.lookup(id).is_some_and(|p| {
            is_publish_with_qos(p, QoS::ExactlyOnce) || matches!(p, Packet::PubRel { .. })
        });
        if !awaiting_release {
            self.ignore(PacketType::PubRec, id);
            return;
        }

        debug!(packet_id = id, "Publish received, releasing");
        self.send(Outgoing::Control(Packet::PubRel { packet_id: id }));
    }

    fn on_pubrel(&mut self, id: PacketId) {
        debug!(packet_id = id, "Inbound publish released");
        self.send(Outgoing::Control(Packet::PubComp { packet_id: id }));
        self.delete(PersistKey::recv(id));
    }

    fn on_pubcomp(&mut self, id: PacketId) {
        let completed = self.take_if(id, |p| {
            is_publish_with_qos(p, QoS::ExactlyOnce) || matches!(p, Packet::PubRel { .. })
        });
        match completed {
            Some(Packet::Publish(publish)) => {
                debug!(packet_id = id, topic = %publish.topic, "Publish completed");
                self.emit(Event::PublishConfirmed {
                    topic: publish.topic,
                    error: None,
                });
            }
            Some(_) => debug!(packet_id = id, "Resumed publish completed"),
            None => {
                self.ignore(PacketType::PubComp, id);
                return;
            }
        }
        self.delete_after_writer(PersistKey::send(id));
    }

    fn track(&mut self, id: PacketId, packet: Packet) {
        trace!(packet_id = id, packet_type = %packet.packet_type(), "Tracking request");
        self.ids.associate(id, packet.clone());
        self.store(PersistKey::send(id), &packet);
        self.send(Outgoing::Request(packet));
    }

    /// Releases `id` if its tracked packet satisfies `accept`.
    fn take_if(&mut self, id: PacketId, accept: impl Fn(&Packet) -> bool) -> Option<Packet> {
        if self.ids.lookup(id).is_some_and(accept) {
            self.ids.release(id)
        } else {
            None
        }
    }

    fn ignore(&self, packet_type: PacketType, id: PacketId) {
        debug!(%packet_type, packet_id = id, "Ignoring acknowledgment for untracked id");
    }

    fn store(&self, key: PersistKey, packet: &Packet) {
        if let Err(e) = self.store.store(key, packet) {
            warn!(error = %e, %key, "Failed to persist exchange");
            self.emit(Event::PersistenceError(e));
        }
    }

    fn delete(&self, key: PersistKey) {
        if let Err(e) = self.store.delete(key) {
            warn!(error = %e, %key, "Failed to delete persisted exchange");
            self.emit(Event::PersistenceError(e));
        }
    }

    /// Deletes `key` once the writer has handled everything queued before, so
    /// the PubRel entry it persists after flushing cannot outlive the exchange.
    fn delete_after_writer(&self, key: PersistKey) {
        if self.outgoing.send(Outgoing::Release(key)).is_err() {
            self.delete(key);
        }
    }

    fn send(&self, outgoing: Outgoing) {
        if self.outgoing.send(outgoing).is_err() {
            debug!("Writer stopped, dropping outgoing packet");
        }
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

fn is_publish_with_qos(packet: &Packet, qos: QoS) -> bool {
    matches!(packet, Packet::Publish(publish) if publish.qos == qos)
}

fn granted(topics: &[TopicFilter]) -> Vec<u8> {
    topics.iter().map(|t| u8::from(t.qos)).collect()
}
