// Live viewer routes (SSE)
//
// Every published message goes to all connected viewers. The hub never waits:
// with no viewers a message is dropped, and a viewer that falls more than the
// channel capacity behind loses the oldest messages and keeps going.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{
    future,
    stream::{Stream, StreamExt},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use telemetry_core::Broadcaster;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use utoipa::ToSchema;

/// Topic used by the connectivity test channel
pub const ECHO_TOPIC: &str = "my response";

/// One message fanned out to live viewers
#[derive(Debug, Clone)]
pub struct LiveMessage {
    pub topic: String,
    pub data: Value,
}

/// Fan-out point shared by the pipeline and the `/live` route
#[derive(Debug, Clone)]
pub struct LiveHub {
    sender: broadcast::Sender<LiveMessage>,
}

impl LiveHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveMessage> {
        self.sender.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Broadcaster for LiveHub {
    fn publish(&self, topic: &str, message: Value) {
        let message = LiveMessage {
            topic: topic.to_string(),
            data: message,
        };
        if self.sender.send(message).is_err() {
            tracing::trace!(topic, "No live viewers, message dropped");
        }
    }
}

// ============================================
// App State and Routes
// ============================================

#[derive(Clone)]
pub struct AppState {
    pub hub: LiveHub,
}

impl AppState {
    pub fn new(hub: LiveHub) -> Self {
        Self { hub }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/live", get(stream_live))
        .route("/live/echo", post(echo))
        .with_state(state)
}

/// Request body for the echo channel
#[derive(Debug, Deserialize, ToSchema)]
pub struct EchoRequest {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
}

// ============================================
// HTTP Handlers
// ============================================

/// GET /live - Stream accepted events to a viewer
///
/// The SSE event name is the topic (`event` for ingested events) and the data
/// is the JSON message.
#[utoipa::path(
    get,
    path = "/live",
    responses(
        (status = 200, description = "Live event stream", content_type = "text/event-stream")
    ),
    tag = "live"
)]
pub async fn stream_live(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    tracing::info!(viewers = state.hub.viewer_count() + 1, "Live viewer connected");

    let stream = BroadcastStream::new(state.hub.subscribe()).filter_map(|received| {
        future::ready(match received {
            Ok(message) => Some(Ok(SseEvent::default()
                .event(message.topic)
                .data(message.data.to_string()))),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Live viewer lagging, messages skipped");
                None
            }
        })
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /live/echo - Publish a test message to all viewers
#[utoipa::path(
    post,
    path = "/live/echo",
    request_body = EchoRequest,
    responses(
        (status = 202, description = "Message published")
    ),
    tag = "live"
)]
pub async fn echo(State(state): State<AppState>, Json(req): Json<EchoRequest>) -> StatusCode {
    state.hub.publish(ECHO_TOPIC, json!({ "data": req.data }));
    StatusCode::ACCEPTED
}
