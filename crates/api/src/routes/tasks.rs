//! Route definitions for the `/tasks` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// GET    /                -> list_tasks
/// POST   /                -> create_task
/// GET    /{id}            -> get_task
/// GET    /{id}/results    -> task_results
/// POST   /{id}/start      -> start_task
/// POST   /{id}/pause      -> pause_task
/// POST   /{id}/resume     -> resume_task
/// POST   /{id}/cancel     -> cancel_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route("/{id}", get(tasks::get_task))
        .route("/{id}/results", get(tasks::task_results))
        .route("/{id}/start", post(tasks::start_task))
        .route("/{id}/pause", post(tasks::pause_task))
        .route("/{id}/resume", post(tasks::resume_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
}
