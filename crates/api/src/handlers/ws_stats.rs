use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::engine::BroadcasterStats;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsStats {
    pub connections: usize,
    pub rooms: usize,
    pub broadcaster: BroadcasterStats,
}

/// GET /api/v1/ws/stats
pub async fn ws_stats(State(state): State<AppState>) -> Json<DataResponse<WsStats>> {
    Json(DataResponse {
        data: WsStats {
            connections: state.registry.connection_count().await,
            rooms: state.rooms.room_count().await,
            broadcaster: state.broadcaster.stats(),
        },
    })
}
