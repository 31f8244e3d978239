//! Database-backed EventStore implementation
//!
//! This module implements the core EventStore trait over the `events` table.
//! Each statement is atomic in SQLite, so an append is all-or-nothing and a
//! concurrent query sees either the whole row or none of it.

use async_trait::async_trait;
use std::collections::BTreeSet;
use telemetry_core::{EventKey, EventQuery, EventStore, StorageError, StoredRecord};

use crate::repositories::Database;

// ============================================================================
// DbEventStore - Stores events in SQLite
// ============================================================================

/// Database-backed event store
#[derive(Clone)]
pub struct DbEventStore {
    db: Database,
}

impl DbEventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Map sqlx failures into the storage taxonomy
pub fn storage_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("5") => {
            // SQLITE_BUSY after the busy timeout elapsed
            StorageError::Timeout
        }
        other => StorageError::backend(other.to_string()),
    }
}

#[async_trait]
impl EventStore for DbEventStore {
    async fn append(&self, record: &StoredRecord) -> Result<(), StorageError> {
        self.db.insert_event(record).await.map_err(|e| {
            tracing::error!(error = %e, key = %record.key(), "Failed to append event");
            storage_error(e)
        })
    }

    async fn most_recent(&self, key: &EventKey) -> Result<Option<StoredRecord>, StorageError> {
        let row = self.db.latest_event(key).await.map_err(storage_error)?;
        row.map(StoredRecord::try_from).transpose()
    }

    async fn distinct_types(&self) -> Result<BTreeSet<String>, StorageError> {
        let types = self.db.list_event_types().await.map_err(storage_error)?;
        Ok(types.into_iter().collect())
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = self.db.list_events(query).await.map_err(storage_error)?;
        rows.into_iter().map(StoredRecord::try_from).collect()
    }
}
