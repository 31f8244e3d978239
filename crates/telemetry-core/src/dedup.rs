// Windowed deduplication
//
// DedupGate decides whether an event for a key should be recorded, using the
// event store as the source of truth for the most recent record of that key.
//
// The check is a read-then-decide over shared durable state. In best-effort
// mode two concurrent requests for one key can both see "no recent record" and
// both write inside the window. KeyLocks closes that gap inside one process by
// letting the caller hold a per-key shard lock across check and append.

use chrono::NaiveDateTime;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::StorageError;
use crate::event::EventKey;
use crate::traits::EventStore;

/// Number of lock shards used in serialized mode
pub const LOCK_SHARDS: usize = 64;

/// Outcome of a dedup check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No record for the key within the window
    Record,
    /// Last record for the key is only `elapsed` old
    Skip { elapsed: chrono::Duration },
}

impl Decision {
    pub fn is_record(&self) -> bool {
        matches!(self, Decision::Record)
    }

    /// Pure decision rule: record unless a previous record is at most `window` old
    pub fn evaluate(
        last: Option<NaiveDateTime>,
        now: NaiveDateTime,
        window: chrono::Duration,
    ) -> Self {
        match last {
            None => Decision::Record,
            Some(last) => {
                let elapsed = now - last;
                if elapsed > window {
                    Decision::Record
                } else {
                    Decision::Skip { elapsed }
                }
            }
        }
    }
}

/// Fixed set of async mutexes addressed by key hash
#[derive(Debug)]
pub struct KeyLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn shard(&self, key: &EventKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Lock the shard owning `key`; unrelated keys may share a shard
    pub async fn lock(&self, key: &EventKey) -> MutexGuard<'_, ()> {
        self.shards[self.shard(key)].lock().await
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(LOCK_SHARDS)
    }
}

/// Rate limiter keyed by `(app, type, user)`
pub struct DedupGate {
    store: Arc<dyn EventStore>,
    window: chrono::Duration,
    locks: Option<KeyLocks>,
}

impl DedupGate {
    /// Best-effort gate; concurrent checks for one key are not excluded
    pub fn new(store: Arc<dyn EventStore>, window: chrono::Duration) -> Self {
        Self {
            store,
            window,
            locks: None,
        }
    }

    /// Enable per-key exclusion for callers that use `lock`
    pub fn serialized(mut self) -> Self {
        self.locks = Some(KeyLocks::default());
        self
    }

    /// Hold the key's shard for the duration of check + append.
    /// Returns `None` in best-effort mode.
    pub async fn lock(&self, key: &EventKey) -> Option<MutexGuard<'_, ()>> {
        match &self.locks {
            Some(locks) => Some(locks.lock(key).await),
            None => None,
        }
    }

    pub async fn should_record(
        &self,
        key: &EventKey,
        now: NaiveDateTime,
    ) -> Result<Decision, StorageError> {
        let last = self.store.most_recent(key).await?;
        Ok(Decision::evaluate(
            last.map(|record| record.timestamp),
            now,
            self.window,
        ))
    }
}
