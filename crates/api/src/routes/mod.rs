pub mod health;
pub mod tasks;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` REST route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws/stats                            connection, room and broadcaster counters
///
/// /tasks                               list, create
/// /tasks/{id}                          get
/// /tasks/{id}/results                  generated documents
/// /tasks/{id}/start                    start (POST)
/// /tasks/{id}/pause                    pause (POST)
/// /tasks/{id}/resume                   resume (POST)
/// /tasks/{id}/cancel                   cancel (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/stats", get(handlers::ws_stats::ws_stats))
        .nest("/tasks", tasks::router())
}

/// The WebSocket upgrade route. Mounted outside the REST request timeout
/// because the upgraded socket outlives the request.
pub fn socket_routes() -> Router<AppState> {
    Router::new().route("/api/v1/ws", get(ws::ws_handler))
}
