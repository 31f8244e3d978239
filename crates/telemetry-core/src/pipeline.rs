// Ingest pipeline
//
// For each incoming event, in order:
//   validate → resolve location → stamp time → dedup check → append → publish
//
// Validation failures return before any side effect. Geolocation failures are
// absorbed under GeoFailurePolicy::Degrade. Storage failures propagate as-is;
// retrying an append could write twice inside the dedup window.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::{DedupMode, GeoFailurePolicy, IngestConfig};
use crate::dedup::{DedupGate, Decision};
use crate::error::Result;
use crate::event::{EnrichedEventView, LocationRecord, RawEventInput, StoredRecord};
use crate::traits::{Broadcaster, Clock, EventStore, GeoResolver, SystemClock, EVENT_TOPIC};

/// What happened to an event that passed validation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Appended to the store and broadcast
    Recorded,
    /// Dropped by the dedup gate
    Skipped { elapsed_minutes: f64 },
}

/// Result of `IngestPipeline::accept`
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptanceResult {
    pub event: EnrichedEventView,
    pub outcome: Outcome,
}

impl AcceptanceResult {
    /// True when the event was durably written
    pub fn accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Recorded)
    }

    /// Human-readable status narrative for debug responses
    pub fn render(&self) -> String {
        let (country, region) = match &self.event.location {
            Some(location) => (location.country_code.as_str(), location.region_code.as_str()),
            None => ("unknown", "unknown"),
        };

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Event({}) from {}, running {} in {}/{}",
            self.event.event_type, self.event.user_id, self.event.app_name, country, region
        );
        match self.outcome {
            Outcome::Recorded => out.push_str("DB Record created\n"),
            Outcome::Skipped { elapsed_minutes } => {
                let _ = writeln!(
                    out,
                    "Event skipped, last db record added {elapsed_minutes:.2} min ago"
                );
            }
        }
        out
    }
}

/// Composition root of ingestion
pub struct IngestPipeline {
    store: Arc<dyn EventStore>,
    geo: Arc<dyn GeoResolver>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    gate: DedupGate,
    geo_policy: GeoFailurePolicy,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn EventStore>,
        geo: Arc<dyn GeoResolver>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let gate = DedupGate::new(store.clone(), config.dedup_window);
        let gate = match config.dedup_mode {
            DedupMode::BestEffort => gate,
            DedupMode::Serialized => gate.serialized(),
        };

        Self {
            store,
            geo,
            broadcaster,
            clock: Arc::new(SystemClock),
            gate,
            geo_policy: config.geo_policy,
        }
    }

    /// Replace the wall clock (useful for testing)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Store backing the pipeline, shared with the query endpoints
    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    /// Current time on the pipeline's clock
    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    /// Ingest one event from `source` (the client address, if known)
    pub async fn accept(&self, raw: RawEventInput, source: Option<&str>) -> Result<AcceptanceResult> {
        let event = raw.validate()?;
        let location = self.locate(source).await?;

        let (outcome, now) = {
            // Held across check and append in serialized mode
            let _guard = self.gate.lock(&event.key).await;
            let now = self.clock.now();

            match self.gate.should_record(&event.key, now).await? {
                Decision::Record => {
                    let record = StoredRecord::new(&event, location.as_ref(), now);
                    self.store.append(&record).await?;
                    (Outcome::Recorded, now)
                }
                Decision::Skip { elapsed } => (
                    Outcome::Skipped {
                        elapsed_minutes: elapsed.num_seconds() as f64 / 60.0,
                    },
                    now,
                ),
            }
        };

        let view = EnrichedEventView::new(&event, location, now);
        match outcome {
            Outcome::Recorded => {
                tracing::info!(key = %event.key, timestamp = %view.timestamp, "Event recorded");
                self.publish(&view);
            }
            Outcome::Skipped { elapsed_minutes } => {
                tracing::debug!(
                    key = %event.key,
                    elapsed_minutes,
                    "Event skipped inside dedup window"
                );
            }
        }

        Ok(AcceptanceResult {
            event: view,
            outcome,
        })
    }

    async fn locate(&self, source: Option<&str>) -> Result<Option<LocationRecord>> {
        let Some(address) = source else {
            tracing::debug!("No client address, location unknown");
            return Ok(None);
        };

        match self.geo.resolve(address).await {
            Ok(location) => Ok(Some(location)),
            Err(e) => match self.geo_policy {
                GeoFailurePolicy::Degrade => {
                    tracing::warn!(address, error = %e, "Geolocation failed, location unknown");
                    Ok(None)
                }
                GeoFailurePolicy::Reject => Err(e.into()),
            },
        }
    }

    fn publish(&self, view: &EnrichedEventView) {
        match view.to_message() {
            Ok(message) => self.broadcaster.publish(EVENT_TOPIC, message),
            Err(e) => tracing::warn!(error = %e, "Failed to encode live event, not broadcast"),
        }
    }
}
