//! The `packet` module defines the control packets exchanged with the broker.
//!
//! Every packet kind is a variant of the closed [`Packet`] enum, so each
//! dispatch site matches exhaustively and adding a packet kind is a
//! compile-time checked change.
//!
//! Packets derive `Serialize`/`Deserialize` because the redelivery store
//! keeps them as JSON records and the debugging codec frames them as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier correlating a tracked request with its acknowledgment(s).
///
/// Zero is never allocated.
pub type PacketId = u16;

/// Delivery guarantee of a publish.
///
/// Ordered by strength: `AtMostOnce < AtLeastOnce < ExactlyOnce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid QoS level: {0}")]
pub struct InvalidQoS(pub u8);

/// Type tag of a [`Packet`], used for logging and for routing decisions that
/// only care about the kind of packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

/// An application message, either sent by us or delivered by the broker.
///
/// `packet_id` is `None` for QoS 0 and is filled in by the session when a
/// QoS 1 or QoS 2 publish is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publish {
    pub topic: String,
    pub qos: QoS,
    pub packet_id: Option<PacketId>,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub dup: bool,
}

impl Publish {
    pub fn new(topic: impl Into<String>, qos: QoS, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            packet_id: None,
            payload: payload.into(),
            retain: false,
            dup: false,
        }
    }
}

/// A topic filter together with the QoS requested for it.
///
/// After the matching SubAck arrives the `qos` field holds the level the
/// broker actually granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFilter {
    pub name: String,
    pub qos: QoS,
}

impl TopicFilter {
    pub fn new(name: impl Into<String>, qos: QoS) -> Self {
        Self {
            name: name.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribe {
    pub packet_id: PacketId,
    pub topics: Vec<TopicFilter>,
}

/// Per-topic answer carried by a SubAck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscribeReturnCode {
    Granted(QoS),
    Failure,
}

impl SubscribeReturnCode {
    /// Wire value of a rejected subscription.
    pub const FAILURE: u8 = 0x80;

    pub fn from_code(code: u8) -> Result<Self, InvalidQoS> {
        if code == Self::FAILURE {
            Ok(SubscribeReturnCode::Failure)
        } else {
            QoS::try_from(code).map(SubscribeReturnCode::Granted)
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            SubscribeReturnCode::Granted(qos) => u8::from(*qos),
            SubscribeReturnCode::Failure => Self::FAILURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAck {
    pub packet_id: PacketId,
    pub codes: Vec<SubscribeReturnCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unsubscribe {
    pub packet_id: PacketId,
    pub topics: Vec<String>,
}

/// A control packet of the publish/subscribe protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck { packet_id: PacketId },
    PubRec { packet_id: PacketId },
    PubRel { packet_id: PacketId },
    PubComp { packet_id: PacketId },
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck { packet_id: PacketId },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck { .. } => PacketType::PubAck,
            Packet::PubRec { .. } => PacketType::PubRec,
            Packet::PubRel { .. } => PacketType::PubRel,
            Packet::PubComp { .. } => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck { .. } => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Packet identifier carried by the packet, if its kind has one.
    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::PubAck { packet_id }
            | Packet::PubRec { packet_id }
            | Packet::PubRel { packet_id }
            | Packet::PubComp { packet_id }
            | Packet::UnsubAck { packet_id } => Some(*packet_id),
            Packet::Subscribe(s) => Some(s.packet_id),
            Packet::SubAck(s) => Some(s.packet_id),
            Packet::Unsubscribe(u) => Some(u.packet_id),
            Packet::Connect(_)
            | Packet::ConnAck(_)
            | Packet::PingReq
            | Packet::PingResp
            | Packet::Disconnect => None,
        }
    }
}
