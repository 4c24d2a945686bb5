use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::{CloseHandle, CloseReason, Outgoing};
use crate::config::SessionConfig;
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveState {
    /// Keepalive period is too short to ping; the monitor never pings.
    Disabled,
    Idle,
    /// A PingReq is outstanding.
    WaitingResponse,
    /// No PingResp arrived in time and the transport was closed.
    Dead,
}

impl fmt::Display for KeepaliveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeepaliveState::Disabled => "disabled",
            KeepaliveState::Idle => "idle",
            KeepaliveState::WaitingResponse => "waiting_response",
            KeepaliveState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Sends PingReq every three quarters of the keepalive period and closes the
/// transport when the matching PingResp does not arrive within
/// `keepalive * factor` of the ping.
pub struct KeepaliveMonitor {
    interval: Duration,
    timeout: Duration,
    outgoing: UnboundedSender<Outgoing>,
    close: CloseHandle,
    state: KeepaliveState,
}

impl KeepaliveMonitor {
    pub fn new(
        config: &SessionConfig,
        outgoing: UnboundedSender<Outgoing>,
        close: CloseHandle,
    ) -> Self {
        let state = if config.keepalive_enabled() && !config.ping_interval().is_zero() {
            KeepaliveState::Idle
        } else {
            KeepaliveState::Disabled
        };
        Self {
            interval: config.ping_interval(),
            timeout: config.keepalive_timeout(),
            outgoing,
            close,
            state,
        }
    }

    pub fn state(&self) -> KeepaliveState {
        self.state
    }

    /// Runs until the ping channel closes, the writer goes away or the broker
    /// stops answering. Returns the final state.
    pub async fn run(mut self, mut pings: UnboundedReceiver<()>) -> KeepaliveState {
        if self.state == KeepaliveState::Disabled {
            debug!("Keepalive disabled");
            return self.state;
        }

        let start = Instant::now()
            .checked_add(self.interval)
            .unwrap_or_else(far_future);
        let mut ticker = time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                ping = pings.recv() => match ping {
                    // a late or unsolicited response
                    Some(()) => continue,
                    None => break,
                },
            }

            if self
                .outgoing
                .send(Outgoing::Control(Packet::PingReq))
                .is_err()
            {
                debug!("Writer stopped, ending keepalive");
                break;
            }
            trace!("PingReq queued");
            self.state = KeepaliveState::WaitingResponse;

            tokio::select! {
                ping = pings.recv() => match ping {
                    Some(()) => {
                        trace!("PingResp received");
                        self.state = KeepaliveState::Idle;
                    }
                    None => break,
                },
                _ = time::sleep_until(deadline_after(self.timeout)) => {
                    warn!(timeout = ?self.timeout, "No PingResp from broker, closing transport");
                    self.close.close_with(CloseReason::KeepaliveTimeout);
                    self.state = KeepaliveState::Dead;
                    break;
                }
            }
        }

        self.state
    }
}

// about thirty years
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

fn deadline_after(timeout: Duration) -> Instant {
    Instant::now().checked_add(timeout).unwrap_or_else(far_future)
}
