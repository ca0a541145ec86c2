//! End-to-end Room scenarios: broadcast exclusion and room-full, per the
//! testable-property scenarios for the Room/Hub layer.

use hertzboard::frame::Frame;
use hertzboard::presence::Presence;
use hertzboard::room::{spawn, Member};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn member(capacity: usize) -> (Member, mpsc::Receiver<Frame>) {
    let user_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(capacity);
    (
        Member {
            session_id: Uuid::new_v4(),
            user_id,
            display_name: "tester".to_string(),
            outbound: tx,
            presence: Presence::new(user_id, "tester".to_string()),
        },
        rx,
    )
}

// Scenario (D): broadcast exclusion.
#[tokio::test]
async fn broadcast_exclusion_across_three_sessions() {
    let (reaped_tx, _reaped_rx) = mpsc::unbounded_channel();
    let room = spawn(Uuid::new_v4(), 10, Duration::from_secs(300), reaped_tx);

    let (m1, mut r1) = member(8);
    let (m2, mut r2) = member(8);
    let (m3, mut r3) = member(8);
    let s1 = m1.session_id;

    room.register(m1).await.unwrap();
    room.register(m2).await.unwrap();
    room.register(m3).await.unwrap();
    while r1.try_recv().is_ok() {}
    while r2.try_recv().is_ok() {}
    while r3.try_recv().is_ok() {}

    room.broadcast(Frame::outbound("operation", serde_json::json!({"x": 1})), Some(s1));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(r1.try_recv().is_err(), "sender must receive nothing");
    assert_eq!(r2.try_recv().unwrap().frame_type, "operation");
    assert_eq!(r3.try_recv().unwrap().frame_type, "operation");
    // exactly once each
    assert!(r2.try_recv().is_err());
    assert!(r3.try_recv().is_err());
}

// Scenario (E): room-full.
#[tokio::test]
async fn room_full_rejects_third_join_and_keeps_first_two() {
    let (reaped_tx, _reaped_rx) = mpsc::unbounded_channel();
    let room = spawn(Uuid::new_v4(), 2, Duration::from_secs(300), reaped_tx);

    let (m1, _r1) = member(8);
    let (m2, _r2) = member(8);
    let (m3, _r3) = member(8);

    room.register(m1).await.unwrap();
    room.register(m2).await.unwrap();
    let err = room.register(m3).await.unwrap_err();
    assert_eq!(err.code(), "room_full");
}

// Invariant 6: join delivers roster before any subsequent broadcast.
#[tokio::test]
async fn joining_session_replays_roster_before_live_broadcast() {
    let (reaped_tx, _reaped_rx) = mpsc::unbounded_channel();
    let room = spawn(Uuid::new_v4(), 10, Duration::from_secs(300), reaped_tx);

    let (m1, mut r1) = member(8);
    room.register(m1).await.unwrap();
    while r1.try_recv().is_ok() {}

    let (m2, mut r2) = member(8);
    room.register(m2).await.unwrap();

    // m2 sees m1's roster entry first.
    let first = r2.try_recv().unwrap();
    assert_eq!(first.frame_type, "user_joined");

    room.broadcast(Frame::outbound("operation", serde_json::json!({})), None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    // Next frame on m2's queue is the broadcast, confirming roster arrived first.
    let second = r2.try_recv().unwrap();
    assert_eq!(second.frame_type, "operation");

    // m1 sees the new member's join announcement.
    let joined = r1.try_recv().unwrap();
    assert_eq!(joined.frame_type, "user_joined");
}
