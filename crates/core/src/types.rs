/// Task identifiers are opaque strings of the form `task_<uuid>`.
pub type TaskId = String;

/// Template identifiers are assigned by the template collaborator.
pub type TemplateId = String;

/// WebSocket connection identifiers are opaque strings of the form `conn_<uuid>`.
pub type ConnId = String;

/// Generated document identifiers are opaque strings of the form `doc_<uuid>`.
pub type DocumentId = String;

/// One data row: a JSON object keyed by column/field name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh task id.
pub fn new_task_id() -> TaskId {
    format!("task_{}", uuid::Uuid::new_v4())
}

/// Generate a fresh connection id.
pub fn new_conn_id() -> ConnId {
    format!("conn_{}", uuid::Uuid::new_v4())
}

/// Generate a fresh document id.
pub fn new_document_id() -> DocumentId {
    format!("doc_{}", uuid::Uuid::new_v4())
}
