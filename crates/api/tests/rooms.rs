//! Tests for `RoomRouter` membership, delivery and stale-connection reaping.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use docbatch_api::config::WsConfig;
use docbatch_api::error::WsError;
use docbatch_api::ws::{reap_stale, ConnectionRegistry, RoomRouter};

fn router() -> RoomRouter {
    RoomRouter::new(Arc::new(ConnectionRegistry::new(WsConfig::default())))
}

fn text(s: &str) -> Message {
    Message::Text(s.to_string().into())
}

// ---------------------------------------------------------------------------
// Test: rooms are created on first join and deleted on last leave
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rooms_live_only_while_occupied() {
    let rooms = router();
    let _a = rooms.registry().add("a".into()).await.unwrap();
    let _b = rooms.registry().add("b".into()).await.unwrap();

    rooms.join("a", "ops").await.unwrap();
    rooms.join("b", "ops").await.unwrap();
    assert_eq!(rooms.room_count().await, 1);
    assert_eq!(rooms.send_to_room("ops", text("hello")).await, 2);

    rooms.leave("a", "ops").await;
    assert_eq!(rooms.room_count().await, 1);
    rooms.leave("b", "ops").await;
    assert_eq!(rooms.room_count().await, 0);
    assert!(rooms.registry().rooms_of("b").await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: unknown connections cannot join
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_connection_cannot_join() {
    let rooms = router();
    assert_matches!(
        rooms.join("ghost", "ops").await,
        Err(WsError::UnknownConnection(id)) if id == "ghost"
    );
    assert_eq!(rooms.room_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: subscribe maps task ids to task:<id> rooms
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_maps_task_ids_to_rooms() {
    let rooms = router();
    let _a = rooms.registry().add("a".into()).await.unwrap();

    let joined = rooms
        .subscribe_tasks("a", &["task_1".into(), "task_2".into()])
        .await
        .unwrap();
    assert_eq!(joined, vec!["task:task_1", "task:task_2"]);
    assert_eq!(rooms.registry().rooms_of("a").await, vec!["task:task_1", "task:task_2"]);

    rooms.unsubscribe_tasks("a", &["task_1".into()]).await;
    assert_eq!(rooms.registry().rooms_of("a").await, vec!["task:task_2"]);
    assert_eq!(rooms.room_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: room delivery reaches members only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_room_reaches_members_only() {
    let rooms = router();
    let mut a = rooms.registry().add("a".into()).await.unwrap();
    let mut b = rooms.registry().add("b".into()).await.unwrap();
    rooms.join("a", "task:t").await.unwrap();

    assert_eq!(rooms.send_to_room("task:t", text("hello")).await, 1);
    assert_eq!(rooms.send_to_room("task:empty", text("nobody")).await, 0);

    assert_matches!(a.try_recv(), Ok(Message::Text(t)) if t.as_str() == "hello");
    assert!(b.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: a dead member is removed without failing delivery to others
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dead_member_is_removed_and_others_still_receive() {
    let rooms = router();
    let dead = rooms.registry().add("dead".into()).await.unwrap();
    let mut live = rooms.registry().add("live".into()).await.unwrap();
    rooms.join("dead", "task:t").await.unwrap();
    rooms.join("dead", "other").await.unwrap();
    rooms.join("live", "task:t").await.unwrap();
    drop(dead);

    assert_eq!(rooms.send_to_room("task:t", text("update")).await, 1);

    assert_matches!(live.try_recv(), Ok(Message::Text(_)));
    assert_eq!(rooms.send_to_room("task:t", text("again")).await, 1);
    assert_eq!(rooms.room_count().await, 1);
    assert_eq!(rooms.registry().connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: disconnect removes the connection from every room
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_leaves_every_room() {
    let rooms = router();
    let _a = rooms.registry().add("a".into()).await.unwrap();
    let _b = rooms.registry().add("b".into()).await.unwrap();
    rooms.join("a", "r1").await.unwrap();
    rooms.join("a", "r2").await.unwrap();
    rooms.join("b", "r2").await.unwrap();

    rooms.disconnect("a").await;

    assert_eq!(rooms.room_count().await, 1);
    assert_eq!(rooms.send_to_room("r2", text("hello")).await, 1);
    assert!(rooms.registry().rooms_of("a").await.is_empty());
    assert!(!rooms.registry().contains("a").await);
}

// ---------------------------------------------------------------------------
// Test: a connection silent past the timeout is closed and leaves its rooms
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silent_connection_is_reaped_from_registry_and_rooms() {
    let rooms = router();
    let mut silent = rooms.registry().add("silent".into()).await.unwrap();
    let _chatty = rooms.registry().add("chatty".into()).await.unwrap();
    rooms.join("silent", "task:t").await.unwrap();
    rooms.join("chatty", "task:t").await.unwrap();

    tokio::time::advance(Duration::from_secs(45)).await;
    rooms.registry().touch("chatty").await;
    tokio::time::advance(Duration::from_secs(20)).await;

    let reaped = reap_stale(&rooms, Duration::from_secs(60)).await;

    assert_eq!(reaped, vec!["silent".to_string()]);
    assert_matches!(silent.recv().await, Some(Message::Close(None)));
    assert!(silent.recv().await.is_none());
    assert!(!rooms.registry().contains("silent").await);
    assert_eq!(rooms.room_count().await, 1);
    assert_eq!(rooms.send_to_room("task:t", text("still here")).await, 1);
}

// ---------------------------------------------------------------------------
// Test: a join racing a disconnect never leaves a dead member behind
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn join_racing_disconnect_leaves_no_member() {
    let registry = ConnectionRegistry::new(WsConfig {
        max_connections_per_minute: 1000,
        ..WsConfig::default()
    });
    let rooms = Arc::new(RoomRouter::new(Arc::new(registry)));
    for i in 0..200 {
        let conn_id = format!("conn_{i}");
        let _rx = rooms.registry().add(conn_id.clone()).await.unwrap();

        let joiner = {
            let rooms = Arc::clone(&rooms);
            let conn_id = conn_id.clone();
            tokio::spawn(async move { rooms.join(&conn_id, "race").await })
        };
        let leaver = {
            let rooms = Arc::clone(&rooms);
            let conn_id = conn_id.clone();
            tokio::spawn(async move { rooms.disconnect(&conn_id).await })
        };
        let _ = joiner.await.unwrap();
        leaver.await.unwrap();

        assert_eq!(rooms.room_count().await, 0, "iteration {i}");
    }
}
