//! # PopSub Session
//!
//! `popsub_session` is the client-side session engine of a publish/subscribe
//! client. Given an already connected, bidirectional byte stream it runs the
//! protocol for that connection: QoS 1 and QoS 2 acknowledgment handshakes,
//! keepalive pings, and a durable record of in-flight exchanges so they can
//! be resumed on the next connection.
//!
//! ## Core Modules
//!
//! - `packet`: The closed set of control packets and their fields.
//! - `codec`: The `Encoder`/`Decoder` seam and a newline-delimited JSON codec.
//! - `ids`: Packet identifier allocation and the correlation table.
//! - `persistence`: The redelivery store (in memory or sled backed).
//! - `session`: Reader, dispatcher, writer and keepalive tasks wired together.
//! - `config`: Loading and validating session settings.
//! - `utils`: Shared error type and logging setup.

pub mod codec;
pub mod config;
pub mod ids;
pub mod packet;
pub mod persistence;
pub mod session;
pub mod utils;

pub use codec::json::JsonCodec;
pub use config::SessionConfig;
pub use packet::{Packet, PacketId, Publish, QoS, TopicFilter};
pub use session::{CloseReason, Event, Session, SessionEvents, SessionHandle};
pub use utils::error::SessionError;
