//! Handlers for the `/tasks` resource.
//!
//! Thin wrappers over [`docbatch_scheduler::Scheduler`]; every domain error
//! maps to an HTTP status through [`AppError`](crate::error::AppError).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use docbatch_core::task::{CreateTaskRequest, Task};
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// A task record plus its derived progress percentage.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub progress: f64,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        let progress = task.progress_percent();
        Self { task, progress }
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Validate and register a task. Returns 201 with the id and estimates; the
/// task stays `pending` until started.
pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<CreateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let created = state.scheduler.create_task(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
pub async fn list_tasks(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let tasks: Vec<TaskView> = state
        .scheduler
        .list_tasks()
        .await
        .into_iter()
        .map(TaskView::from)
        .collect();
    Ok(Json(DataResponse { data: tasks }))
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.scheduler.get_task_progress(&id).await?;
    Ok(Json(DataResponse {
        data: TaskView::from(task),
    }))
}

/// GET /api/v1/tasks/{id}/results
///
/// Documents generated so far. Works in every status, including cancelled.
pub async fn task_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let records = state.scheduler.task_results(&id).await?;
    Ok(Json(DataResponse { data: records }))
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{id}/start
pub async fn start_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.scheduler.start_task(&id).await?;
    Ok(Json(DataResponse {
        data: TaskView::from(task),
    }))
}

/// POST /api/v1/tasks/{id}/pause
///
/// Returns the snapshot at request time; the task reports `paused` once its
/// in-flight units settle.
pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.scheduler.pause_task(&id).await?;
    Ok(Json(DataResponse {
        data: TaskView::from(task),
    }))
}

/// POST /api/v1/tasks/{id}/resume
pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.scheduler.resume_task(&id).await?;
    Ok(Json(DataResponse {
        data: TaskView::from(task),
    }))
}

/// POST /api/v1/tasks/{id}/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.scheduler.cancel_task(&id).await?;
    Ok(Json(DataResponse {
        data: TaskView::from(task),
    }))
}
