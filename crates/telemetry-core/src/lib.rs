// Telemetry Ingestion Core
//
// This crate provides a DB-agnostic implementation of the telemetry ingest
// pipeline (validate → geolocate → dedup → append → broadcast).
//
// Key design decisions:
// - Uses traits (EventStore, GeoResolver, Broadcaster, Clock) for pluggable backends
// - DedupGate reads the store as the source of truth for the last record per key
// - Dedup races are tolerated by default; DedupMode::Serialized adds per-key locks
// - Geolocation failures degrade to an unknown location unless configured to reject
// - Debug narratives are rendered from a structured AcceptanceResult on demand

pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod geo;
pub mod pipeline;
pub mod query;
pub mod traits;

// In-memory implementations for testing
pub mod memory;

// Re-exports for convenience
pub use config::{ConfigError, DedupMode, GeoConfig, GeoFailurePolicy, IngestConfig};
pub use dedup::{Decision, DedupGate, KeyLocks};
pub use error::{GeoLookupError, IngestError, Result, StorageError};
pub use event::{
    format_timestamp, parse_timestamp, EnrichedEventView, EventKey, LocationRecord,
    RawEventInput, StoredRecord, ValidatedEvent, TIMESTAMP_FORMAT,
};
pub use geo::{client_address, HttpGeoResolver};
pub use pipeline::{AcceptanceResult, IngestPipeline, Outcome};
pub use query::{EventQuery, Filter};
pub use traits::{Broadcaster, Clock, EventStore, GeoResolver, SystemClock, EVENT_TOPIC};
