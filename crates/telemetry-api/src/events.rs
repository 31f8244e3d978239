// Event ingestion HTTP route
//
// POST /event/{eventType} hands the body to the ingest pipeline. Both recorded
// and skipped events answer with the JSON string "true"; clients that want to
// know which happened ask for the debug narrative instead.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};
use telemetry_core::{client_address, IngestPipeline, RawEventInput};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;

// ============================================
// App State and Routes
// ============================================

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/event/:event_type", post(ingest_event))
        .with_state(state)
}

// ============================================
// Request types
// ============================================

/// Body of an ingest request
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestRequest {
    /// User the event belongs to
    pub uid: Option<String>,
    /// Application that emitted the event
    pub app: Option<String>,
    /// Event payload, either a JSON value or a string holding encoded JSON
    #[schema(value_type = Object)]
    pub json: Option<Value>,
    /// Answer with a text narrative instead of `"true"`; accepts 0/1 as number, string or bool
    #[serde(default, deserialize_with = "deserialize_flag")]
    #[schema(value_type = Option<bool>)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct IngestQuery {
    /// Caller-supplied user id, logged only
    pub uid: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
    Text(String),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => false,
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(n)) => n != 0,
        Some(Flag::Text(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s.parse::<i64>().is_ok_and(|n| n != 0)
        }
    })
}

// ============================================
// HTTP Handlers
// ============================================

/// POST /event/{event_type} - Ingest one telemetry event
#[utoipa::path(
    post,
    path = "/event/{event_type}",
    params(
        ("event_type" = String, Path, description = "Event type"),
        IngestQuery
    ),
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Event accepted (recorded or skipped)", body = String),
        (status = 400, description = "Malformed body or missing field"),
        (status = 500, description = "Storage failure"),
        (status = 502, description = "Geolocation failed and the service rejects such events")
    ),
    tag = "events"
)]
pub async fn ingest_event(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    Query(query): Query<IngestQuery>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;

    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let source = client_address(forwarded_for, connect_info.map(|ConnectInfo(addr)| addr.ip()));

    tracing::debug!(
        event_type = %event_type,
        query_uid = query.uid.as_deref(),
        source = source.as_deref(),
        "Ingest request"
    );

    let raw = RawEventInput {
        event_type: Some(event_type),
        user_id: req.uid,
        app_name: req.app,
        payload: req.json,
    };

    let result = state.pipeline.accept(raw, source.as_deref()).await?;

    if req.debug {
        Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            result.render(),
        )
            .into_response())
    } else {
        Ok(Json("true").into_response())
    }
}
