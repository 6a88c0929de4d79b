use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use docbatch_core::error::CoreError;
use docbatch_core::messages::{ERR_CONNECTION_REJECTED, ERR_RATE_LIMITED};
use docbatch_core::types::ConnId;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain errors from `docbatch-core` and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from the scheduler or core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A request that is malformed outside of domain validation.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An unexpected internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => {
                let status = match core {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::TaskNotFound(_) => StatusCode::NOT_FOUND,
                    CoreError::TaskStatus { .. } => StatusCode::CONFLICT,
                    CoreError::Generation(_)
                    | CoreError::Structural(_)
                    | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = if let CoreError::Internal(msg) = core {
                    tracing::error!(error = %msg, "Internal core error");
                    "An internal error occurred".to_string()
                } else {
                    core.to_string()
                };
                (status, core.code(), message)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

/// Convenience type alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Per-connection WebSocket failures. Each is reported to the offending
/// connection only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WsError {
    #[error("Rate limit exceeded: at most {limit} messages per minute")]
    RateLimited { limit: usize },

    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnId),
}

impl WsError {
    pub fn code(&self) -> &'static str {
        match self {
            WsError::RateLimited { .. } => ERR_RATE_LIMITED,
            WsError::ConnectionRejected(_) => ERR_CONNECTION_REJECTED,
            WsError::UnknownConnection(_) => "UNKNOWN_CONNECTION",
        }
    }
}
