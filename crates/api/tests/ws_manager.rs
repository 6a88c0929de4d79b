//! Tests for `ConnectionRegistry`.
//!
//! These exercise admission, rate limiting, outbound queueing and liveness
//! tracking directly, without performing any HTTP upgrades.

use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use docbatch_api::config::WsConfig;
use docbatch_api::error::WsError;
use docbatch_api::ws::{ConnectionRegistry, Delivery};

fn config() -> WsConfig {
    WsConfig {
        max_connections: 3,
        max_connections_per_minute: 10,
        max_messages_per_minute: 2,
        outbound_queue_size: 2,
        ..WsConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Test: add and remove track the connection count
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_and_remove_track_connection_count() {
    let registry = ConnectionRegistry::new(config());
    assert_eq!(registry.connection_count().await, 0);

    let _rx = registry.add("conn-1".into()).await.unwrap();
    assert_eq!(registry.connection_count().await, 1);

    assert!(registry.remove("nonexistent").await.is_none());
    assert_eq!(registry.connection_count().await, 1);

    assert!(registry.remove("conn-1").await.is_some());
    assert_eq!(registry.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: the connection cap rejects further admissions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_cap_rejects_admission() {
    let registry = ConnectionRegistry::new(config());
    let _a = registry.add("a".into()).await.unwrap();
    let _b = registry.add("b".into()).await.unwrap();
    let _c = registry.add("c".into()).await.unwrap();

    assert_matches!(
        registry.add("d".into()).await,
        Err(WsError::ConnectionRejected(_))
    );
    assert_eq!(registry.connection_count().await, 3);
}

// ---------------------------------------------------------------------------
// Test: admissions per minute are capped and the window resets
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn admission_rate_resets_after_a_minute() {
    let registry = ConnectionRegistry::new(WsConfig {
        max_connections_per_minute: 2,
        ..config()
    });
    let _a = registry.add("a".into()).await.unwrap();
    registry.remove("a").await;
    let _b = registry.add("b".into()).await.unwrap();
    registry.remove("b").await;

    let rejected = registry.add("c".into()).await;
    assert_matches!(&rejected, Err(e) if e.code() == "CONNECTION_REJECTED");

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(registry.add("c".into()).await.is_ok());
}

// ---------------------------------------------------------------------------
// Test: message rate cap applies to one connection only
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn message_rate_cap_is_per_connection() {
    let registry = ConnectionRegistry::new(config());
    let _a = registry.add("a".into()).await.unwrap();
    let _b = registry.add("b".into()).await.unwrap();

    assert!(registry.check_rate("a").await.is_ok());
    assert!(registry.check_rate("a").await.is_ok());
    assert_matches!(
        registry.check_rate("a").await,
        Err(WsError::RateLimited { limit: 2 })
    );
    assert!(registry.check_rate("b").await.is_ok());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(registry.check_rate("a").await.is_ok());

    assert_matches!(
        registry.check_rate("ghost").await,
        Err(WsError::UnknownConnection(_))
    );
}

// ---------------------------------------------------------------------------
// Test: a full outbound queue drops, a closed one reports Closed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_reports_full_and_closed_queues() {
    let registry = ConnectionRegistry::new(config());
    let mut rx = registry.add("a".into()).await.unwrap();

    assert_eq!(registry.send("a", Message::Text("1".into())).await, Delivery::Queued);
    assert_eq!(registry.send("a", Message::Text("2".into())).await, Delivery::Queued);
    assert_eq!(registry.send("a", Message::Text("3".into())).await, Delivery::Dropped);

    assert_matches!(rx.recv().await, Some(Message::Text(t)) if t.as_str() == "1");

    drop(rx);
    assert_eq!(registry.send("a", Message::Text("4".into())).await, Delivery::Closed);
    assert_eq!(registry.send("ghost", Message::Text("5".into())).await, Delivery::Closed);
}

// ---------------------------------------------------------------------------
// Test: silent connections are reported stale, touched ones are not
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stale_reports_connections_silent_past_timeout() {
    let registry = ConnectionRegistry::new(config());
    let _a = registry.add("a".into()).await.unwrap();
    let _b = registry.add("b".into()).await.unwrap();

    tokio::time::advance(Duration::from_secs(40)).await;
    registry.touch("b").await;
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(registry.stale(Duration::from_secs(60)).await, vec!["a".to_string()]);
}

// ---------------------------------------------------------------------------
// Test: ping_all and shutdown_all reach every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_and_shutdown_reach_every_connection() {
    let registry = ConnectionRegistry::new(config());
    let mut rx1 = registry.add("a".into()).await.unwrap();
    let mut rx2 = registry.add("b".into()).await.unwrap();

    registry.ping_all().await;
    assert_matches!(rx1.recv().await, Some(Message::Ping(_)));
    assert_matches!(rx2.recv().await, Some(Message::Ping(_)));

    registry.shutdown_all().await;
    assert_matches!(rx1.recv().await, Some(Message::Close(None)));
    assert_matches!(rx2.recv().await, Some(Message::Close(None)));
    assert_eq!(registry.connection_count().await, 0);

    // Senders were dropped with the map.
    assert!(rx1.recv().await.is_none());
}

// ---------------------------------------------------------------------------
// Test: broadcast reaches every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_reaches_every_connection() {
    let registry = ConnectionRegistry::new(config());
    let mut rx1 = registry.add("a".into()).await.unwrap();
    let mut rx2 = registry.add("b".into()).await.unwrap();

    assert_eq!(registry.broadcast(Message::Text("hi".into())).await, 2);
    assert_matches!(rx1.recv().await, Some(Message::Text(t)) if t.as_str() == "hi");
    assert_matches!(rx2.recv().await, Some(Message::Text(t)) if t.as_str() == "hi");
}

// ---------------------------------------------------------------------------
// Test: announce sends a broadcast envelope ahead of the shutdown close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn announcement_precedes_shutdown_close() {
    let registry = ConnectionRegistry::new(config());
    let mut rx1 = registry.add("a".into()).await.unwrap();
    let mut rx2 = registry.add("b".into()).await.unwrap();

    assert_eq!(registry.announce("server_shutdown", "bye").await, 2);
    registry.shutdown_all().await;

    for rx in [&mut rx1, &mut rx2] {
        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        let envelope: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(envelope["type"], "broadcast");
        assert_eq!(envelope["payload"]["event"], "server_shutdown");
        assert_eq!(envelope["payload"]["message"], "bye");
        assert!(envelope["id"].is_string());
        assert_matches!(rx.recv().await, Some(Message::Close(None)));
    }
}
