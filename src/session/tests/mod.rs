mod keepalive;
mod support;

use super::*;

#[test]
fn test_close_handle_is_idempotent() {
    let close = CloseHandle::new();
    assert!(!close.is_closed());
    assert_eq!(close.reason(), None);
    assert!(close.close());
    assert!(!close.close());
    assert!(close.clone().is_closed());
    assert_eq!(close.reason(), Some(CloseReason::Requested));
}

#[test]
fn test_first_close_reason_wins() {
    let close = CloseHandle::new();
    assert!(close.close_with(CloseReason::KeepaliveTimeout));
    assert!(!close.close_with(CloseReason::ReadFailed));
    assert!(!close.close());
    assert_eq!(close.reason(), Some(CloseReason::KeepaliveTimeout));
    assert_eq!(CloseReason::KeepaliveTimeout.to_string(), "keepalive timeout");
    assert!(!CloseReason::KeepaliveTimeout.is_graceful());
    assert!(CloseReason::Disconnect.is_graceful());
}

#[tokio::test]
async fn test_closed_resolves_for_every_clone() {
    let close = CloseHandle::new();
    let waiter = close.clone();
    let task = tokio::spawn(async move { waiter.closed().await });

    close.close_with(CloseReason::WriteFailed);
    assert_eq!(task.await.unwrap(), CloseReason::WriteFailed);
    // already closed: resolves immediately
    assert_eq!(close.closed().await, CloseReason::WriteFailed);
}

#[test]
fn test_outgoing_exposes_packet() {
    let control = Outgoing::Control(Packet::PingReq);
    assert_eq!(control.packet(), Some(&Packet::PingReq));

    let request = Outgoing::Request(Packet::Publish(Publish::new("t", QoS::AtMostOnce, "x")));
    assert_eq!(
        request.packet().map(Packet::packet_type),
        Some(crate::packet::PacketType::Publish)
    );

    let release = Outgoing::Release(PersistKey::send(1));
    assert_eq!(release.packet(), None);
}
