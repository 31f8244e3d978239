// Core traits for pluggable backends
//
// The ingest pipeline only talks to these traits. Production wires in SQLite,
// an HTTP geolocation service and a broadcast hub; tests use `memory`.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike, Utc};
use std::collections::BTreeSet;

use crate::error::{GeoLookupError, StorageError};
use crate::event::{EventKey, LocationRecord, StoredRecord};
use crate::query::EventQuery;

// ============================================================================
// GeoResolver - Maps a client address to a location
// ============================================================================

/// Trait for geolocation lookups
///
/// Implementations must bound the lookup with a timeout; a worker may never
/// hang on an unresponsive service.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    /// Resolve a client network address (IPv4/IPv6 text) to a location
    async fn resolve(&self, address: &str) -> Result<LocationRecord, GeoLookupError>;
}

// ============================================================================
// EventStore - Durable append-only log of accepted events
// ============================================================================

/// Trait for storing and querying accepted events
///
/// `append` is the only mutator. Queries never observe a partially written
/// record.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a record; all-or-nothing
    async fn append(&self, record: &StoredRecord) -> Result<(), StorageError>;

    /// Record with the greatest timestamp for exactly this key
    async fn most_recent(&self, key: &EventKey) -> Result<Option<StoredRecord>, StorageError>;

    /// Every event type ever appended
    async fn distinct_types(&self) -> Result<BTreeSet<String>, StorageError>;

    /// Matching records ordered by ascending timestamp
    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, StorageError>;
}

// ============================================================================
// Broadcaster - Fan-out to live viewers
// ============================================================================

/// Topic carrying accepted events
pub const EVENT_TOPIC: &str = "event";

/// Trait for publishing to live viewers
///
/// Fire-and-forget: implementations buffer or drop, they never wait for
/// subscribers.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: &str, message: serde_json::Value);
}

// ============================================================================
// Clock - Source of acceptance timestamps
// ============================================================================

pub trait Clock: Send + Sync {
    /// Current time truncated to whole seconds
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in UTC
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Utc::now().naive_utc();
        now.with_nanosecond(0).unwrap_or(now)
    }
}
