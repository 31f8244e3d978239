// Database models (internal, may differ from core types)

use sqlx::FromRow;
use telemetry_core::{parse_timestamp, StorageError, StoredRecord};

// ============================================
// Event models
// ============================================

/// Row of the `events` table
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub user: String,
    pub app: String,
    pub location: String,
    pub json: String,
    pub dt: String,
}

impl TryFrom<EventRow> for StoredRecord {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&row.dt)
            .ok_or_else(|| StorageError::corrupt(format!("unparseable dt '{}'", row.dt)))?;

        Ok(StoredRecord {
            event_type: row.event_type,
            user_id: row.user,
            app_name: row.app,
            location: row.location,
            payload: row.json,
            timestamp,
        })
    }
}
