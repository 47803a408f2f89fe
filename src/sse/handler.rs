use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth::extract_token;
use crate::connection_manager::{ConnectionHandle, ConnectionRegistry, Role, Transport};
use crate::metrics::ConnectionMetrics;
use crate::server::AppState;
use crate::websocket::{OutboundMessage, SnapshotFilter, TokenQuery};

#[tracing::instrument(
    name = "sse.connect",
    skip(state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn teacher_sse_handler(
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

    let (tx, rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);
    let handle = state.registry.register(
        ConnectionHandle::new(Role::Teacher, tx)
            .with_transport(Transport::Sse)
            .with_label(claims.sub),
    );

    ConnectionMetrics::record_opened(Transport::Sse);
    ConnectionMetrics::set_active(&state.registry.stats());
    tracing::info!(connection_id = %handle.id, "SSE connection established");

    // Buffered until the client starts polling the stream
    state.router.init_connection(&handle).await;

    let guard = CleanupGuard {
        registry: state.registry.clone(),
        connection_id: handle.id,
        connection_start: Instant::now(),
    };
    let stream = create_sse_stream(rx, handle, guard);

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(state.settings.websocket.heartbeat_interval))
                .text("keep-alive"),
        )
        .into_response()
}

/// Stream ends when the client goes away (the stream is dropped) or when
/// the registry closes the handle.
fn create_sse_stream(
    rx: mpsc::Receiver<OutboundMessage>,
    handle: Arc<ConnectionHandle>,
    guard: CleanupGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        let mut filter = SnapshotFilter::new();
        let mut messages = ReceiverStream::new(rx);

        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "connection_id": handle.id }).to_string()));

        loop {
            let msg = tokio::select! {
                msg = messages.next() => msg,
                _ = handle.closed() => None,
            };
            let Some(msg) = msg else {
                break;
            };

            if !filter.admit(&msg) {
                continue;
            }
            if let Some(event) = to_event(&msg) {
                yield Ok(event);
            }
        }
    }
}

fn to_event(msg: &OutboundMessage) -> Option<Event> {
    match msg.to_json() {
        Ok(json) => Some(Event::default().event(msg.message_type().as_str()).data(json)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize SSE message");
            None
        }
    }
}

/// Unregisters the stream's connection when the stream is dropped
struct CleanupGuard {
    registry: Arc<ConnectionRegistry>,
    connection_id: uuid::Uuid,
    connection_start: Instant,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.connection_id);

        let duration = self.connection_start.elapsed().as_secs_f64();
        ConnectionMetrics::record_closed(Transport::Sse, duration);
        ConnectionMetrics::set_active(&self.registry.stats());

        tracing::info!(
            connection_id = %self.connection_id,
            duration_secs = duration,
            "SSE connection closed"
        );
    }
}
