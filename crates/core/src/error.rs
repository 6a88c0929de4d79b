use crate::task::TaskStatus;
use crate::types::TaskId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// Bad create-task input. Surfaced to the caller, no state change.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Illegal lifecycle transition. Surfaced to the caller, no state change.
    #[error("Cannot {action} task {task_id} in status {current}")]
    TaskStatus {
        task_id: TaskId,
        current: TaskStatus,
        action: &'static str,
    },

    /// A single unit of work failed. Retried locally, never aborts the task
    /// on its own.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Setup failure (template vanished, data unreadable). Aborts the task.
    #[error("Structural failure: {0}")]
    Structural(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code used in wire and REST error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::TaskStatus { .. } => "TASK_STATUS_ERROR",
            Self::Generation(_) => "GENERATION_FAILED",
            Self::Structural(_) => "TASK_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
