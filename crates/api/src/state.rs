use std::sync::Arc;

use docbatch_scheduler::Scheduler;

use crate::config::ServerConfig;
use crate::engine::ProgressBroadcaster;
use crate::ws::{ConnectionRegistry, RoomRouter};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Task lifecycle facade.
    pub scheduler: Scheduler,
    /// Live WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Room membership over `registry`.
    pub rooms: Arc<RoomRouter>,
    pub broadcaster: Arc<ProgressBroadcaster>,
}

impl AppState {
    /// Build the delivery layer around `scheduler`.
    pub fn new(config: ServerConfig, scheduler: Scheduler) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.ws.clone()));
        let rooms = Arc::new(RoomRouter::new(Arc::clone(&registry)));
        let broadcaster = Arc::new(ProgressBroadcaster::new(
            Arc::clone(&rooms),
            config.broadcast.clone(),
        ));
        Self {
            config: Arc::new(config),
            scheduler,
            registry,
            rooms,
            broadcaster,
        }
    }
}
