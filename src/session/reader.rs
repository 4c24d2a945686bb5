use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

use super::{CloseHandle, CloseReason, Event};
use crate::codec::{Decoder, ProtocolVersion};
use crate::packet::Packet;
use crate::utils::error::SessionError;

const READ_CHUNK: usize = 4096;

/// Inbound half of the session.
///
/// Decodes packets in arrival order. PingResp becomes a signal for the
/// keepalive monitor, every other packet goes to the dispatcher.
pub struct Reader<R, D> {
    io: R,
    decoder: D,
    version: ProtocolVersion,
    close: CloseHandle,
    events: UnboundedSender<Event>,
}

impl<R, D> Reader<R, D>
where
    R: AsyncRead + Unpin + Send + 'static,
    D: Decoder,
{
    pub fn new(
        io: R,
        decoder: D,
        version: ProtocolVersion,
        close: CloseHandle,
        events: UnboundedSender<Event>,
    ) -> Self {
        Self {
            io,
            decoder,
            version,
            close,
            events,
        }
    }

    /// Runs until the transport fails, the peer hangs up, a packet cannot be
    /// decoded or the transport is closed locally.
    ///
    /// On exit both output channels are dropped, the transport is closed and a
    /// single [`Event::Disconnected`] is emitted. A local close carries its
    /// [`CloseReason`] unless the application asked for it.
    pub async fn run(mut self, packets: UnboundedSender<Packet>, pings: UnboundedSender<()>) {
        let close = self.close.clone();
        let mut buf = Vec::with_capacity(READ_CHUNK);

        let error = loop {
            match self.decoder.decode(self.version, &mut buf) {
                Ok(Some(Packet::PingResp)) => {
                    trace!("Received PingResp");
                    // the monitor is gone when keepalive is disabled
                    let _ = pings.send(());
                    continue;
                }
                Ok(Some(packet)) => {
                    trace!(packet_type = %packet.packet_type(), packet_id = ?packet.packet_id(), "Received packet");
                    if packets.send(packet).is_err() {
                        debug!("Dispatcher stopped, ending reader");
                        break None;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to decode inbound packet");
                    break Some(SessionError::Codec(e));
                }
            }

            buf.reserve(READ_CHUNK);
            tokio::select! {
                reason = close.closed() => {
                    debug!(%reason, "Transport closed locally");
                    break if reason.is_graceful() {
                        None
                    } else {
                        Some(SessionError::Closed(reason))
                    };
                }
                read = self.io.read_buf(&mut buf) => match read {
                    Ok(0) => {
                        info!("Connection closed by peer");
                        break Some(SessionError::ConnectionClosed);
                    }
                    Ok(n) => trace!(bytes = n, "Read from transport"),
                    Err(e) => {
                        warn!(error = %e, "Transport read failed");
                        break Some(SessionError::Io(e));
                    }
                },
            }
        };

        drop(packets);
        drop(pings);
        close.close_with(CloseReason::ReadFailed);
        let _ = self.events.send(Event::Disconnected { error });
    }
}
