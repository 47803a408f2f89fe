use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::extract_token;
use crate::connection_manager::{ConnectionHandle, Role, Transport};
use crate::metrics::ConnectionMetrics;
use crate::server::AppState;

use super::message::{OutboundMessage, ServerMessage, SnapshotFilter};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    pub student: Option<String>,
}

/// Teacher socket upgrade. Requires a JWT with the teacher role.
#[tracing::instrument(
    name = "ws.upgrade.teacher",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn teacher_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = extract_token(query.token.as_deref(), &headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing authentication token").into_response();
    };

    let claims = match state.jwt_validator.authorize_teacher(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "Teacher authorization failed");
            return e.into_response();
        }
    };

    tracing::info!(subject = %claims.sub, "Teacher WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, Role::Teacher, Some(claims.sub)))
}

/// Student socket upgrade. Students are anonymous; `student` only labels logs.
#[tracing::instrument(name = "ws.upgrade.student", skip(ws, state, query))]
pub async fn student_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StudentQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Role::Student, query.student))
}

#[tracing::instrument(
    name = "ws.connection",
    skip_all,
    fields(role = %role)
)]
async fn handle_socket(socket: WebSocket, state: AppState, role: Role, label: Option<String>) {
    let connection_start = Instant::now();
    let (tx, rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);

    let mut handle = ConnectionHandle::new(role, tx);
    if let Some(label) = label {
        handle = handle.with_label(label);
    }
    let handle = state.registry.register(handle);
    let connection_id = handle.id;

    ConnectionMetrics::record_opened(Transport::WebSocket);
    ConnectionMetrics::set_active(&state.registry.stats());

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut send_task = tokio::spawn(write_loop(ws_sender, rx));

    // Teachers see the current state as soon as they join
    if role == Role::Teacher {
        state.router.init_connection(&handle).await;
    }

    let recv_state = state.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &recv_state, &recv_handle).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(connection_id = %recv_handle.id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = handle.closed() => {
            tracing::debug!(connection_id = %connection_id, "Connection closed by server");
        }
    }
    send_task.abort();
    recv_task.abort();

    state.registry.unregister(connection_id);

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(Transport::WebSocket, duration);
    ConnectionMetrics::set_active(&state.registry.stats());

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Drain the connection's channel into the socket, dropping stale snapshots
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) {
    let mut filter = SnapshotFilter::new();

    while let Some(msg) = rx.recv().await {
        if !filter.admit(&msg) {
            tracing::trace!("Dropped stale snapshot");
            continue;
        }
        let Some(frame) = to_frame(msg) else {
            continue;
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

fn to_frame(msg: OutboundMessage) -> Option<Message> {
    match msg {
        OutboundMessage::Ping => Some(Message::Ping(Default::default())),
        other => match other.to_json() {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                None
            }
        },
    }
}

/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();
            state.router.handle_text(handle, text.as_str()).await;
            true
        }
        Message::Binary(_) => {
            handle.update_activity();
            let reply = ServerMessage::error("UNSUPPORTED_FORMAT", "Binary messages are not supported");
            if state.broadcaster.send_to(handle, reply).await.is_err() {
                return false;
            }
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}
