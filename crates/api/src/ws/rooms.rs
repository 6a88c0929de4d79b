//! Room membership and room-scoped delivery.
//!
//! Rooms are created on first join and deleted on last leave. The router and
//! the [`ConnectionRegistry`] each have their own lock and neither is held
//! while the other is taken.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use docbatch_core::messages::task_room;
use docbatch_core::types::ConnId;
use tokio::sync::RwLock;

use crate::error::WsError;
use crate::ws::manager::{ConnectionRegistry, Delivery};

pub struct RoomRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: RwLock<HashMap<String, HashSet<ConnId>>>,
}

impl RoomRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn join(&self, conn_id: &str, room: &str) -> Result<(), WsError> {
        if !self.registry.add_room(conn_id, room).await {
            return Err(WsError::UnknownConnection(conn_id.to_string()));
        }
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(conn_id.to_string());
        // A disconnect between the two inserts has already swept its rooms.
        if !self.registry.contains(conn_id).await {
            self.remove_member(conn_id, room).await;
            return Err(WsError::UnknownConnection(conn_id.to_string()));
        }
        tracing::debug!(conn_id = %conn_id, room = %room, "Joined room");
        Ok(())
    }

    pub async fn leave(&self, conn_id: &str, room: &str) {
        self.remove_member(conn_id, room).await;
        self.registry.remove_room(conn_id, room).await;
        tracing::debug!(conn_id = %conn_id, room = %room, "Left room");
    }

    /// Join `task:<id>` for each task id. Returns the rooms joined.
    pub async fn subscribe_tasks(
        &self,
        conn_id: &str,
        task_ids: &[String],
    ) -> Result<Vec<String>, WsError> {
        let mut joined = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            let room = task_room(id);
            self.join(conn_id, &room).await?;
            joined.push(room);
        }
        Ok(joined)
    }

    pub async fn unsubscribe_tasks(&self, conn_id: &str, task_ids: &[String]) -> Vec<String> {
        let mut left = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            let room = task_room(id);
            self.leave(conn_id, &room).await;
            left.push(room);
        }
        left
    }

    /// Remove a connection from the registry and from every room.
    pub async fn disconnect(&self, conn_id: &str) {
        let Some(joined) = self.registry.remove(conn_id).await else {
            return;
        };
        for room in &joined {
            self.remove_member(conn_id, room).await;
        }
        tracing::debug!(conn_id = %conn_id, rooms = joined.len(), "Connection removed");
    }

    /// Deliver `message` to every member of `room`.
    ///
    /// Members whose socket is gone are disconnected. Returns the number of
    /// members the message was queued for.
    pub async fn send_to_room(&self, room: &str, message: Message) -> usize {
        let members: Vec<ConnId> = match self.rooms.read().await.get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };

        let mut queued = 0;
        let mut dead = Vec::new();
        for conn_id in members {
            match self.registry.send(&conn_id, message.clone()).await {
                Delivery::Queued => queued += 1,
                Delivery::Dropped => {}
                Delivery::Closed => dead.push(conn_id),
            }
        }

        for conn_id in dead {
            tracing::debug!(conn_id = %conn_id, room = %room, "Dropping dead room member");
            self.disconnect(&conn_id).await;
            // Membership may outlive the registry entry if the connection
            // was removed between snapshot and send.
            self.remove_member(&conn_id, room).await;
        }
        queued
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn remove_member(&self, conn_id: &str, room: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(conn_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }
}
