// Telemetry event types
//
// An event lives for a single request: it arrives as RawEventInput, is
// validated into a ValidatedEvent, enriched with a LocationRecord and either
// persisted as a StoredRecord or dropped by the dedup gate. Accepted events are
// also broadcast to live viewers as an EnrichedEventView.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::{IngestError, Result};

/// Wire format of persisted and broadcast timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a timestamp in the persisted `YYYY-MM-DD HH:MM:SS` form
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp in the persisted `YYYY-MM-DD HH:MM:SS` form
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).ok()
}

/// Dedup key: `(app_name, event_type, user_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub app_name: String,
    pub event_type: String,
    pub user_id: String,
}

impl EventKey {
    pub fn new(
        app_name: impl Into<String>,
        event_type: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            event_type: event_type.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.event_type, self.user_id)
    }
}

/// Coarse location derived from the requester's address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct LocationRecord {
    pub lat: f64,
    pub lon: f64,
    pub country_code: String,
    pub country_name: String,
    pub region_code: String,
    pub region_name: String,
    pub city: String,
}

/// Event as supplied by a client, before validation
#[derive(Debug, Clone, Default)]
pub struct RawEventInput {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub app_name: Option<String>,
    /// Structured JSON, or a JSON string holding encoded JSON
    pub payload: Option<Value>,
}

impl RawEventInput {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_app(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Check required fields and decode the payload to structured form
    pub fn validate(self) -> Result<ValidatedEvent> {
        let event_type = required(self.event_type, "type")?;
        let user_id = required(self.user_id, "uid")?;
        let app_name = required(self.app_name, "app")?;
        let payload = decode_payload(self.payload)?;

        Ok(ValidatedEvent {
            key: EventKey {
                app_name,
                event_type,
                user_id,
            },
            payload,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(IngestError::validation(format!(
            "field '{field}' is required and must be non-empty"
        ))),
    }
}

fn decode_payload(payload: Option<Value>) -> Result<Value> {
    let decoded = match payload {
        None | Some(Value::Null) => {
            return Err(IngestError::validation("field 'json' is required"));
        }
        Some(Value::String(encoded)) => serde_json::from_str::<Value>(&encoded)
            .map_err(|e| IngestError::validation(format!("field 'json' is not valid JSON: {e}")))?,
        Some(structured) => structured,
    };

    if decoded.is_null() {
        return Err(IngestError::validation("field 'json' must not be null"));
    }
    Ok(decoded)
}

/// Event that passed validation; payload is always structured
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub key: EventKey,
    pub payload: Value,
}

/// Persisted row. Location and payload are opaque JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub event_type: String,
    pub user_id: String,
    pub app_name: String,
    pub location: String,
    pub payload: String,
    pub timestamp: NaiveDateTime,
}

impl StoredRecord {
    pub fn new(
        event: &ValidatedEvent,
        location: Option<&LocationRecord>,
        timestamp: NaiveDateTime,
    ) -> Self {
        let location = location
            .and_then(|l| serde_json::to_value(l).ok())
            .unwrap_or(Value::Null);
        Self {
            event_type: event.key.event_type.clone(),
            user_id: event.key.user_id.clone(),
            app_name: event.key.app_name.clone(),
            location: location.to_string(),
            payload: canonical(&event.payload).to_string(),
            timestamp,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(&self.app_name, &self.event_type, &self.user_id)
    }
}

// Object keys sorted at every level so equal payloads serialize to equal text
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Accepted event as pushed to live viewers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct EnrichedEventView {
    pub event_type: String,
    pub user_id: String,
    pub app_name: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub json_data: Value,
    /// `null` when the location could not be resolved
    pub location: Option<LocationRecord>,
    pub timestamp: String,
}

impl EnrichedEventView {
    pub fn new(
        event: &ValidatedEvent,
        location: Option<LocationRecord>,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            event_type: event.key.event_type.clone(),
            user_id: event.key.user_id.clone(),
            app_name: event.key.app_name.clone(),
            json_data: event.payload.clone(),
            location,
            timestamp: format_timestamp(timestamp),
        }
    }

    /// Broadcast envelope: `{"data": {...}}`
    pub fn to_message(&self) -> serde_json::Result<Value> {
        Ok(json!({ "data": serde_json::to_value(self)? }))
    }
}
