// In-memory implementations for testing
//
// Everything here lives in process memory and is lost on drop. The HTTP tests
// and the pipeline tests run against these instead of SQLite and the network.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::error::{GeoLookupError, StorageError};
use crate::event::{EventKey, LocationRecord, StoredRecord};
use crate::query::EventQuery;
use crate::traits::{Broadcaster, Clock, EventStore, GeoResolver};

// ============================================================================
// InMemoryEventStore - Stores records in a vector
// ============================================================================

/// In-memory event store
///
/// Records are kept in append order behind a single RwLock, so queries never
/// see a half-written record.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventStore {
    records: Arc<RwLock<Vec<StoredRecord>>>,
    fail_appends: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Create a new in-memory event store
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in append order
    pub async fn records(&self) -> Vec<StoredRecord> {
        self.records.read().await.clone()
    }

    /// Number of appended records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Make subsequent appends fail with a storage error (useful for testing)
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, record: &StoredRecord) -> Result<(), StorageError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::backend("append rejected by test store"));
        }
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn most_recent(&self, key: &EventKey) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| {
                r.app_name == key.app_name && r.event_type == key.event_type && r.user_id == key.user_id
            })
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn distinct_types(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|r| r.event_type.clone())
            .collect())
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, StorageError> {
        let mut matching: Vec<StoredRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps
        matching.sort_by_key(|r| r.timestamp);
        if let Some(limit) = query.limit {
            matching.truncate(limit as usize);
        }
        Ok(matching)
    }
}

// ============================================================================
// RecordingBroadcaster - Captures published messages
// ============================================================================

/// Broadcaster that keeps every published message
#[derive(Debug, Default, Clone)]
pub struct RecordingBroadcaster {
    messages: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published `(topic, message)` pairs in order
    pub fn messages(&self) -> Vec<(String, serde_json::Value)> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Messages published on one topic
    pub fn on_topic(&self, topic: &str) -> Vec<serde_json::Value> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m)
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish(&self, topic: &str, message: serde_json::Value) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((topic.to_string(), message));
    }
}

// ============================================================================
// ManualClock - Clock controlled by the test
// ============================================================================

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// Geo resolvers for tests
// ============================================================================

/// Resolver that answers every lookup with the same location
#[derive(Debug, Clone)]
pub struct StaticGeoResolver {
    location: LocationRecord,
    addresses: Arc<Mutex<Vec<String>>>,
}

impl StaticGeoResolver {
    pub fn new(location: LocationRecord) -> Self {
        Self {
            location,
            addresses: Arc::default(),
        }
    }

    /// Number of lookups served
    pub fn calls(&self) -> usize {
        self.addresses().len()
    }

    /// Addresses looked up, in order
    pub fn addresses(&self) -> Vec<String> {
        self.addresses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn resolve(&self, address: &str) -> Result<LocationRecord, GeoLookupError> {
        self.addresses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(address.to_string());
        Ok(self.location.clone())
    }
}

/// Resolver that always fails as if the service were down
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingGeoResolver;

#[async_trait]
impl GeoResolver for FailingGeoResolver {
    async fn resolve(&self, address: &str) -> Result<LocationRecord, GeoLookupError> {
        Err(GeoLookupError::Unreachable(format!(
            "no route to geolocation service for {address}"
        )))
    }
}
