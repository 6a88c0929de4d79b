//! WebSocket message type constants for task progress delivery.
//!
//! Used by the api crate's broadcaster and socket handler. Every wire message
//! is a JSON envelope `{type, payload, timestamp, id}`.

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Sent once on socket open with the connection id and server time.
pub const MSG_TYPE_CONNECTED: &str = "connected";

/// Reply to a client `ping`.
pub const MSG_TYPE_PONG: &str = "pong";

/// Acknowledges subscribe, unsubscribe, join and leave requests.
pub const MSG_TYPE_SUBSCRIPTION_ACK: &str = "subscription_ack";

/// Task transitioned to processing.
pub const MSG_TYPE_TASK_STARTED: &str = "task_started";

/// Changed progress fields of one task.
pub const MSG_TYPE_TASK_PROGRESS: &str = "task_progress";

/// Per-template counters that changed since the last emission.
pub const MSG_TYPE_GENERATION_STATUS: &str = "generation_status";

pub const MSG_TYPE_TASK_COMPLETED: &str = "task_completed";

pub const MSG_TYPE_TASK_FAILED: &str = "task_failed";

pub const MSG_TYPE_TASK_PAUSED: &str = "task_paused";

pub const MSG_TYPE_TASK_CANCELLED: &str = "task_cancelled";

/// Error reply to the sending connection only.
pub const MSG_TYPE_ERROR: &str = "error";

/// Server-wide announcement.
pub const MSG_TYPE_BROADCAST: &str = "broadcast";

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

pub const MSG_TYPE_PING: &str = "ping";
pub const MSG_TYPE_SUBSCRIBE: &str = "subscribe";
pub const MSG_TYPE_UNSUBSCRIBE: &str = "unsubscribe";
pub const MSG_TYPE_JOIN_ROOM: &str = "join_room";
pub const MSG_TYPE_LEAVE_ROOM: &str = "leave_room";

// ---------------------------------------------------------------------------
// Error codes carried in `error` payloads
// ---------------------------------------------------------------------------

pub const ERR_MESSAGE_PARSE: &str = "MESSAGE_PARSE_ERROR";
pub const ERR_UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN_MESSAGE_TYPE";
pub const ERR_INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
pub const ERR_RATE_LIMITED: &str = "RATE_LIMITED";
pub const ERR_CONNECTION_REJECTED: &str = "CONNECTION_REJECTED";

/// Room name for a task's subscribers.
pub fn task_room(task_id: &str) -> String {
    format!("task:{task_id}")
}
