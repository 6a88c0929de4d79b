use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use docbatch_core::messages::{
    ERR_MESSAGE_PARSE, MSG_TYPE_CONNECTED, MSG_TYPE_PONG, MSG_TYPE_SUBSCRIPTION_ACK,
};
use docbatch_core::types::new_conn_id;
use futures::{SinkExt, StreamExt};
use serde_json::json;

use crate::engine::broadcaster::snapshot_messages;
use crate::state::AppState;
use crate::ws::protocol::{parse_client_message, ClientMessage, Subscription, WsEnvelope};

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Admits the connection, or replies with an error and closes.
///   2. Spawns a sender task that drains the connection's outbound queue.
///   3. Dispatches inbound messages on the current task.
///   4. Removes the connection from the registry and every room on exit.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = new_conn_id();
    let (mut sink, mut stream) = socket.split();

    let mut rx = match state.registry.add(conn_id.clone()).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket connection rejected");
            let reply = WsEnvelope::error(e.code(), e.to_string()).into_message();
            let _ = sink.send(reply).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    reply(
        &state,
        &conn_id,
        WsEnvelope::new(
            MSG_TYPE_CONNECTED,
            json!({
                "connectionId": conn_id,
                "serverTime": chrono::Utc::now(),
            }),
        ),
    )
    .await;

    // Sender task: forward queued messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let receive = async {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => handle_text(&state, &conn_id, text.as_str()).await,
                Ok(Message::Pong(_)) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                    state.registry.touch(&conn_id).await;
                }
                Ok(Message::Ping(_)) => state.registry.touch(&conn_id).await,
                Ok(Message::Binary(_)) => {
                    let err = WsEnvelope::error(ERR_MESSAGE_PARSE, "Binary frames are not supported");
                    reply(&state, &conn_id, err).await;
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    // Either side ending closes the connection: the client went away, or
    // the server queued a Close (reaping, shutdown).
    tokio::select! {
        _ = receive => {}
        _ = &mut send_task => {}
    }

    state.rooms.disconnect(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

async fn handle_text(state: &AppState, conn_id: &str, text: &str) {
    state.registry.touch(conn_id).await;
    if let Err(e) = state.registry.check_rate(conn_id).await {
        tracing::debug!(conn_id = %conn_id, error = %e, "Inbound message rejected");
        reply(state, conn_id, WsEnvelope::error(e.code(), e.to_string())).await;
        return;
    }

    let message = match parse_client_message(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, code = e.code, "Malformed client message");
            reply(state, conn_id, e.to_envelope()).await;
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            let pong = WsEnvelope::new(MSG_TYPE_PONG, json!({ "serverTime": chrono::Utc::now() }));
            reply(state, conn_id, pong).await;
        }
        ClientMessage::Subscribe(sub) => subscribe(state, conn_id, sub).await,
        ClientMessage::Unsubscribe(sub) => {
            state.rooms.unsubscribe_tasks(conn_id, &sub.task_ids).await;
            for room in &sub.rooms {
                state.rooms.leave(conn_id, room).await;
            }
            ack(state, conn_id, "unsubscribe", &sub.task_ids, &sub.rooms).await;
        }
        ClientMessage::JoinRoom { room } => match state.rooms.join(conn_id, &room).await {
            Ok(()) => ack(state, conn_id, "join_room", &[], &[room]).await,
            Err(e) => reply(state, conn_id, WsEnvelope::error(e.code(), e.to_string())).await,
        },
        ClientMessage::LeaveRoom { room } => {
            state.rooms.leave(conn_id, &room).await;
            ack(state, conn_id, "leave_room", &[], &[room]).await;
        }
    }
}

/// Join the requested rooms, acknowledge, then send the full current state
/// of every known task so the client can apply later diffs.
async fn subscribe(state: &AppState, conn_id: &str, sub: Subscription) {
    let joined = async {
        state.rooms.subscribe_tasks(conn_id, &sub.task_ids).await?;
        for room in &sub.rooms {
            state.rooms.join(conn_id, room).await?;
        }
        Ok::<_, crate::error::WsError>(())
    };
    if let Err(e) = joined.await {
        reply(state, conn_id, WsEnvelope::error(e.code(), e.to_string())).await;
        return;
    }
    ack(state, conn_id, "subscribe", &sub.task_ids, &sub.rooms).await;

    for task_id in &sub.task_ids {
        if let Ok(task) = state.scheduler.get_task_progress(task_id).await {
            for message in snapshot_messages(&task) {
                reply(state, conn_id, message).await;
            }
        }
    }
}

/// Acknowledge a membership change. `joined` lists every room the
/// connection is in after the change.
async fn ack(state: &AppState, conn_id: &str, action: &str, task_ids: &[String], rooms: &[String]) {
    let joined = state.registry.rooms_of(conn_id).await;
    let message = WsEnvelope::new(
        MSG_TYPE_SUBSCRIPTION_ACK,
        json!({ "action": action, "taskIds": task_ids, "rooms": rooms, "joined": joined }),
    );
    reply(state, conn_id, message).await;
}

async fn reply(state: &AppState, conn_id: &str, message: WsEnvelope) {
    state.registry.send(conn_id, message.into_message()).await;
}
