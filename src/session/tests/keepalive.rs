use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::packet::Packet;
use crate::session::keepalive::{KeepaliveMonitor, KeepaliveState};
use crate::session::{CloseHandle, CloseReason, Outgoing};

fn config(secs: u64, factor: f64) -> SessionConfig {
    SessionConfig::new(Duration::from_secs(secs), factor).unwrap()
}

#[tokio::test]
async fn test_zero_period_disables_monitor() {
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let (_pings_tx, pings) = mpsc::unbounded_channel();
    let monitor = KeepaliveMonitor::new(&config(0, 1.0), outgoing_tx, CloseHandle::new());
    assert_eq!(monitor.state(), KeepaliveState::Disabled);

    assert_eq!(monitor.run(pings).await, KeepaliveState::Disabled);
    assert_eq!(outgoing.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_missing_response_closes_transport() {
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let (_pings_tx, pings) = mpsc::unbounded_channel();
    let close = CloseHandle::new();
    let monitor = KeepaliveMonitor::new(&config(4, 1.5), outgoing_tx, close.clone());

    let start = Instant::now();
    let task = tokio::spawn(monitor.run(pings));

    assert_eq!(
        outgoing.recv().await,
        Some(Outgoing::Control(Packet::PingReq))
    );
    let pinged = Instant::now();
    assert_eq!(pinged - start, Duration::from_secs(3));

    assert_eq!(close.closed().await, CloseReason::KeepaliveTimeout);
    assert_eq!(pinged.elapsed(), Duration::from_secs(6));
    assert_eq!(task.await.unwrap(), KeepaliveState::Dead);
    assert!(!close.close(), "monitor already closed the transport");
}

#[tokio::test(start_paused = true)]
async fn test_response_restores_regular_schedule() {
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let (pings_tx, pings) = mpsc::unbounded_channel();
    let close = CloseHandle::new();
    let monitor = KeepaliveMonitor::new(&config(4, 1.5), outgoing_tx, close.clone());
    let task = tokio::spawn(monitor.run(pings));

    for _ in 0..3 {
        assert_eq!(
            outgoing.recv().await,
            Some(Outgoing::Control(Packet::PingReq))
        );
        let pinged = Instant::now();
        tokio::time::sleep(Duration::from_secs(1)).await;
        pings_tx.send(()).unwrap();

        assert_eq!(
            outgoing.recv().await,
            Some(Outgoing::Control(Packet::PingReq))
        );
        assert_eq!(pinged.elapsed(), Duration::from_secs(3));
        pings_tx.send(()).unwrap();
    }

    drop(pings_tx);
    assert_eq!(task.await.unwrap(), KeepaliveState::Idle);
    assert!(!close.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_stops_when_writer_is_gone() {
    let (outgoing_tx, outgoing) = mpsc::unbounded_channel();
    let (_pings_tx, pings) = mpsc::unbounded_channel();
    let close = CloseHandle::new();
    let monitor = KeepaliveMonitor::new(&config(4, 1.5), outgoing_tx, close.clone());
    drop(outgoing);

    assert_eq!(monitor.run(pings).await, KeepaliveState::Idle);
    assert!(!close.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_stops_when_reader_drops_signal_channel() {
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let (pings_tx, pings) = mpsc::unbounded_channel::<()>();
    let close = CloseHandle::new();
    let monitor = KeepaliveMonitor::new(&config(4, 1.5), outgoing_tx, close.clone());
    let task = tokio::spawn(monitor.run(pings));

    assert!(outgoing.recv().await.is_some());
    drop(pings_tx);

    assert_eq!(task.await.unwrap(), KeepaliveState::WaitingResponse);
    assert!(!close.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_subsecond_period_is_treated_as_disabled() {
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let (_pings_tx, pings) = mpsc::unbounded_channel();
    let config = SessionConfig::new(Duration::from_nanos(1), 1.0).unwrap();
    let monitor = KeepaliveMonitor::new(&config, outgoing_tx, CloseHandle::new());
    assert_eq!(monitor.state(), KeepaliveState::Disabled);

    assert_eq!(monitor.run(pings).await, KeepaliveState::Disabled);
    assert_eq!(outgoing.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_longest_keepalive_does_not_overflow_deadlines() {
    let (outgoing_tx, mut outgoing) = mpsc::unbounded_channel();
    let (pings_tx, pings) = mpsc::unbounded_channel();
    let close = CloseHandle::new();
    let config = SessionConfig::new(Duration::from_secs(u64::from(u16::MAX)), 1000.0).unwrap();
    let monitor = KeepaliveMonitor::new(&config, outgoing_tx, close.clone());
    let task = tokio::spawn(monitor.run(pings));

    assert_eq!(
        outgoing.recv().await,
        Some(Outgoing::Control(Packet::PingReq))
    );
    pings_tx.send(()).unwrap();
    drop(pings_tx);
    assert_eq!(task.await.unwrap(), KeepaliveState::Idle);
    assert!(!close.is_closed());
}
