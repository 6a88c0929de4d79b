use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use docbatch_core::types::ConnId;
use tokio_util::sync::CancellationToken;

use crate::ws::RoomRouter;

/// Spawn a background task that reaps silent connections and pings the rest.
///
/// Runs every `interval` until `cancel` fires.
pub fn start_heartbeat(
    rooms: Arc<RoomRouter>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Heartbeat stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let reaped = reap_stale(&rooms, timeout).await;
                    let count = rooms.registry().connection_count().await;
                    tracing::debug!(count, reaped = reaped.len(), "WebSocket heartbeat ping");
                    rooms.registry().ping_all().await;
                }
            }
        }
    })
}

/// Close and remove every connection silent for longer than `timeout`.
pub async fn reap_stale(rooms: &RoomRouter, timeout: Duration) -> Vec<ConnId> {
    let stale = rooms.registry().stale(timeout).await;
    for conn_id in &stale {
        tracing::info!(conn_id = %conn_id, "Reaping stale WebSocket connection");
        rooms.registry().send(conn_id, Message::Close(None)).await;
        rooms.disconnect(conn_id).await;
    }
    stale
}
