// Historical query HTTP routes
//
// Read-only views over the event store. Location and payload are returned as
// the text blobs they were stored as.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use telemetry_core::{
    format_timestamp, parse_timestamp, EventQuery, Filter, IngestPipeline, StoredRecord,
};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;

/// Path segment that matches every application
pub const ALL_APPS: &str = "all";

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
        .route("/get/types", get(list_types))
        .route("/get/events/:app_filter", get(list_events))
        .with_state(state)
}

// ============================================
// Query Parameters and Responses
// ============================================

/// Filters for the events listing. Empty values are wildcards.
#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Inclusive lower bound, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`
    pub from: Option<String>,
    /// Inclusive upper bound; a bare date covers the whole day. Defaults to now.
    pub to: Option<String>,
    /// Event type
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// User id
    pub userid: Option<String>,
    /// Maximum number of records
    pub limit: Option<u32>,
}

/// One stored event as returned by the listing
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventEntry {
    #[serde(rename = "type")]
    pub event_type: String,
    pub user_id: String,
    pub app: String,
    /// Stored location JSON text (`null` when unknown)
    pub location: String,
    /// Stored payload JSON text
    pub json: String,
    pub timestamp: String,
}

impl From<StoredRecord> for EventEntry {
    fn from(record: StoredRecord) -> Self {
        Self {
            event_type: record.event_type,
            user_id: record.user_id,
            app: record.app_name,
            location: record.location,
            json: record.payload,
            timestamp: format_timestamp(record.timestamp),
        }
    }
}

/// Events keyed by their position in timestamp order
#[derive(Debug, Serialize, ToSchema)]
pub struct EventsResponse {
    pub events: BTreeMap<usize, EventEntry>,
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Start,
    End,
}

fn parse_bound(
    name: &str,
    value: Option<String>,
    bound: Bound,
) -> Result<Option<NaiveDateTime>, ApiError> {
    let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };

    if let Some(ts) = parse_timestamp(&raw) {
        return Ok(Some(ts));
    }

    let invalid = || {
        ApiError::BadRequest(format!(
            "'{name}' must be YYYY-MM-DD HH:MM:SS or YYYY-MM-DD, got '{raw}'"
        ))
    };
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
    let bounded = match bound {
        Bound::Start => date.and_hms_opt(0, 0, 0),
        Bound::End => date.and_hms_opt(23, 59, 59),
    };
    bounded.map(Some).ok_or_else(invalid)
}

// ============================================
// HTTP Handlers
// ============================================

/// GET /get/types - Distinct event types ever recorded
#[utoipa::path(
    get,
    path = "/get/types",
    responses(
        (status = 200, description = "Sorted distinct event types", body = Vec<String>),
        (status = 500, description = "Storage failure")
    ),
    tag = "queries"
)]
pub async fn list_types(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let types = state.pipeline.store().distinct_types().await?;
    Ok(Json(types.into_iter().collect()))
}

/// GET /get/events/{app_filter} - Stored events for an application, or `all`
#[utoipa::path(
    get,
    path = "/get/events/{app_filter}",
    params(
        ("app_filter" = String, Path, description = "Application name, or `all`"),
        EventsQuery
    ),
    responses(
        (status = 200, description = "Matching events in timestamp order", body = EventsResponse),
        (status = 400, description = "Unparseable time bound"),
        (status = 500, description = "Storage failure")
    ),
    tag = "queries"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(app_filter): Path<String>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let from = parse_bound("from", params.from, Bound::Start)?;
    let to = parse_bound("to", params.to, Bound::End)?.unwrap_or_else(|| state.pipeline.now());

    let app = if app_filter == ALL_APPS {
        Filter::Any
    } else {
        Filter::from_param(Some(app_filter))
    };

    let query = EventQuery::all()
        .app(app)
        .event_type(Filter::from_param(params.event_type))
        .user(Filter::from_param(params.userid))
        .between(from, Some(to))
        .limit(params.limit);

    let records = state.pipeline.store().query(&query).await?;
    tracing::debug!(count = records.len(), ?query, "Events listed");

    let events = records
        .into_iter()
        .map(EventEntry::from)
        .enumerate()
        .collect();

    Ok(Json(EventsResponse { events }))
}
