//! Wire envelope and client message parsing.
//!
//! Every frame is JSON `{type, payload, timestamp, id}`; `timestamp` is epoch
//! milliseconds and `id` a v4 UUID.

use axum::extract::ws::Message;
use docbatch_core::messages::{
    ERR_INVALID_PAYLOAD, ERR_MESSAGE_PARSE, ERR_UNKNOWN_MESSAGE_TYPE, MSG_TYPE_ERROR,
    MSG_TYPE_JOIN_ROOM, MSG_TYPE_LEAVE_ROOM, MSG_TYPE_PING, MSG_TYPE_SUBSCRIBE,
    MSG_TYPE_UNSUBSCRIBE,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub timestamp: i64,
    pub id: String,
}

impl WsEnvelope {
    pub fn new(kind: &str, payload: impl Serialize) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            tracing::error!(kind, error = %e, "Failed to serialize message payload");
            Value::Null
        });
        Self {
            kind: kind.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            MSG_TYPE_ERROR,
            json!({ "code": code, "message": message.into() }),
        )
    }

    /// Encode as a text frame.
    pub fn into_message(self) -> Message {
        let text = serde_json::to_string(&self).unwrap_or_else(|e| {
            tracing::error!(kind = %self.kind, error = %e, "Failed to encode message");
            String::from("{}")
        });
        Message::Text(text.into())
    }
}

/// A recognised client request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    JoinRoom { room: String },
    LeaveRoom { room: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subscription {
    pub task_ids: Vec<String>,
    pub rooms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RoomPayload {
    room: String,
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Why a client frame was rejected. Sent back as an `error` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: &'static str,
    pub message: String,
}

impl ProtocolError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn to_envelope(&self) -> WsEnvelope {
        WsEnvelope::error(self.code, self.message.clone())
    }
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let raw: RawClientMessage = serde_json::from_str(text)
        .map_err(|e| ProtocolError::new(ERR_MESSAGE_PARSE, format!("Invalid message: {e}")))?;
    let payload = if raw.payload.is_null() {
        json!({})
    } else {
        raw.payload
    };

    match raw.kind.as_str() {
        MSG_TYPE_PING => Ok(ClientMessage::Ping),
        MSG_TYPE_SUBSCRIBE => Ok(ClientMessage::Subscribe(payload_as(payload)?)),
        MSG_TYPE_UNSUBSCRIBE => Ok(ClientMessage::Unsubscribe(payload_as(payload)?)),
        MSG_TYPE_JOIN_ROOM => {
            let p: RoomPayload = payload_as(payload)?;
            Ok(ClientMessage::JoinRoom { room: p.room })
        }
        MSG_TYPE_LEAVE_ROOM => {
            let p: RoomPayload = payload_as(payload)?;
            Ok(ClientMessage::LeaveRoom { room: p.room })
        }
        other => Err(ProtocolError::new(
            ERR_UNKNOWN_MESSAGE_TYPE,
            format!("Unknown message type: {other}"),
        )),
    }
}

fn payload_as<T: DeserializeOwned>(payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload)
        .map_err(|e| ProtocolError::new(ERR_INVALID_PAYLOAD, format!("Invalid payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_reads_task_ids_and_rooms() {
        let msg = parse_client_message(
            r#"{"type":"subscribe","payload":{"taskIds":["task_1"],"rooms":["ops"]}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe(Subscription {
                task_ids: vec!["task_1".into()],
                rooms: vec!["ops".into()],
            })
        );
    }

    #[test]
    fn missing_or_null_payload_is_empty() {
        assert_eq!(parse_client_message(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert_eq!(
            parse_client_message(r#"{"type":"unsubscribe","payload":null}"#).unwrap(),
            ClientMessage::Unsubscribe(Subscription::default())
        );
    }

    #[test]
    fn rejections_carry_codes() {
        assert_eq!(parse_client_message("not json").unwrap_err().code, ERR_MESSAGE_PARSE);
        assert_eq!(
            parse_client_message(r#"{"type":"shout"}"#).unwrap_err().code,
            ERR_UNKNOWN_MESSAGE_TYPE
        );
        assert_eq!(
            parse_client_message(r#"{"type":"join_room","payload":{}}"#)
                .unwrap_err()
                .code,
            ERR_INVALID_PAYLOAD
        );
    }

    #[test]
    fn envelope_has_type_payload_timestamp_and_id() {
        let Message::Text(text) = WsEnvelope::error("X", "boom").into_message() else {
            panic!("expected a text frame");
        };
        let v: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["payload"]["code"], "X");
        assert!(v["timestamp"].is_i64());
        assert_eq!(v["id"].as_str().unwrap().len(), 36);
    }
}
