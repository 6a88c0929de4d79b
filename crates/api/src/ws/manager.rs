use std::collections::{HashMap, HashSet};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use docbatch_core::messages::MSG_TYPE_BROADCAST;
use docbatch_core::types::{ConnId, Timestamp};
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use crate::config::WsConfig;
use crate::error::WsError;
use crate::ws::protocol::WsEnvelope;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::Sender<Message>;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Fixed one-minute counting window.
#[derive(Debug)]
struct RateWindow {
    started: Instant,
    count: usize,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            count: 0,
        }
    }

    /// Count one hit. Returns `false` once `limit` hits were already taken
    /// in the current window.
    fn try_hit(&mut self, limit: usize) -> bool {
        let now = Instant::now();
        if now.duration_since(self.started) >= RATE_WINDOW {
            self.started = now;
            self.count = 0;
        }
        if self.count >= limit {
            return false;
        }
        self.count += 1;
        true
    }
}

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Bounded channel for outbound messages to this connection.
    pub sender: WsSender,
    /// When this connection was established.
    pub connected_at: Timestamp,
    /// Last pong or inbound message.
    last_seen: Instant,
    /// Rooms this connection belongs to. The room router holds the
    /// authoritative member lists; this copy drives cleanup on removal.
    rooms: HashSet<String>,
    inbound: RateWindow,
}

/// Result of queueing one message for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The outbound queue was full; this message was dropped.
    Dropped,
    /// The connection is gone or its socket task has exited.
    Closed,
}

struct RegistryInner {
    connections: HashMap<ConnId, WsConnection>,
    admissions: RateWindow,
}

/// Registry of every live WebSocket connection.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. Never calls into the room router.
pub struct ConnectionRegistry {
    config: WsConfig,
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner {
                connections: HashMap::new(),
                admissions: RateWindow::new(),
            }),
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Admit and register a connection.
    ///
    /// Returns the receiver half of its outbound queue, or
    /// [`WsError::ConnectionRejected`] when the connection cap or the
    /// per-minute admission rate is exhausted.
    pub async fn add(&self, conn_id: ConnId) -> Result<mpsc::Receiver<Message>, WsError> {
        let mut inner = self.inner.write().await;
        if inner.connections.len() >= self.config.max_connections {
            return Err(WsError::ConnectionRejected(format!(
                "server is at its limit of {} connections",
                self.config.max_connections
            )));
        }
        if !inner
            .admissions
            .try_hit(self.config.max_connections_per_minute)
        {
            return Err(WsError::ConnectionRejected(format!(
                "more than {} connections opened in the last minute",
                self.config.max_connections_per_minute
            )));
        }

        let (tx, rx) = mpsc::channel(self.config.outbound_queue_size.max(1));
        let conn = WsConnection {
            sender: tx,
            connected_at: chrono::Utc::now(),
            last_seen: Instant::now(),
            rooms: HashSet::new(),
            inbound: RateWindow::new(),
        };
        inner.connections.insert(conn_id, conn);
        Ok(rx)
    }

    /// Remove a connection, returning the rooms it had joined.
    pub async fn remove(&self, conn_id: &str) -> Option<HashSet<String>> {
        self.inner
            .write()
            .await
            .connections
            .remove(conn_id)
            .map(|c| c.rooms)
    }

    pub async fn contains(&self, conn_id: &str) -> bool {
        self.inner.read().await.connections.contains_key(conn_id)
    }

    /// Record liveness for a connection.
    pub async fn touch(&self, conn_id: &str) {
        if let Some(conn) = self.inner.write().await.connections.get_mut(conn_id) {
            conn.last_seen = Instant::now();
        }
    }

    /// Count one inbound message against the connection's per-minute cap.
    pub async fn check_rate(&self, conn_id: &str) -> Result<(), WsError> {
        let limit = self.config.max_messages_per_minute;
        let mut inner = self.inner.write().await;
        let conn = inner
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| WsError::UnknownConnection(conn_id.to_string()))?;
        if conn.inbound.try_hit(limit) {
            Ok(())
        } else {
            Err(WsError::RateLimited { limit })
        }
    }

    /// Note room membership on the connection. Returns `false` for an
    /// unknown connection.
    pub async fn add_room(&self, conn_id: &str, room: &str) -> bool {
        match self.inner.write().await.connections.get_mut(conn_id) {
            Some(conn) => {
                conn.rooms.insert(room.to_string());
                true
            }
            None => false,
        }
    }

    pub async fn remove_room(&self, conn_id: &str, room: &str) {
        if let Some(conn) = self.inner.write().await.connections.get_mut(conn_id) {
            conn.rooms.remove(room);
        }
    }

    /// Rooms a connection belongs to, sorted.
    pub async fn rooms_of(&self, conn_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut rooms: Vec<String> = inner
            .connections
            .get(conn_id)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Queue a message for one connection without waiting.
    pub async fn send(&self, conn_id: &str, message: Message) -> Delivery {
        let inner = self.inner.read().await;
        let Some(conn) = inner.connections.get(conn_id) else {
            return Delivery::Closed;
        };
        match conn.sender.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(conn_id = %conn_id, "Outbound queue full, message dropped");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Queue a message for every connection. Returns how many accepted it.
    pub async fn broadcast(&self, message: Message) -> usize {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|conn| conn.sender.try_send(message.clone()).is_ok())
            .count()
    }

    /// Send a `broadcast` envelope `{event, message}` to every connection.
    pub async fn announce(&self, event: &str, message: &str) -> usize {
        let envelope = WsEnvelope::new(
            MSG_TYPE_BROADCAST,
            json!({ "event": event, "message": message }),
        );
        let delivered = self.broadcast(envelope.into_message()).await;
        tracing::info!(announcement = event, delivered, "Broadcast announcement sent");
        delivered
    }

    /// Connections silent for longer than `timeout`.
    pub async fn stale(&self, timeout: Duration) -> Vec<ConnId> {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .connections
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.write().await;
        let count = inner.connections.len();
        for conn in inner.connections.values() {
            let _ = conn.sender.try_send(Message::Close(None));
        }
        inner.connections.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let inner = self.inner.read().await;
        for conn in inner.connections.values() {
            let _ = conn.sender.try_send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(WsConfig::default())
    }
}
