// Integration tests for the ingest pipeline
//
// These tests drive IngestPipeline end to end over the in-memory store,
// broadcaster and clock, checking the dedup window and side-effect rules.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use telemetry_core::memory::{
    FailingGeoResolver, InMemoryEventStore, ManualClock, RecordingBroadcaster, StaticGeoResolver,
};
use telemetry_core::{
    DedupMode, EventKey, EventQuery, EventStore, IngestConfig, IngestError, IngestPipeline,
    LocationRecord, RawEventInput, StorageError, StoredRecord, EVENT_TOPIC,
};

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn location() -> LocationRecord {
    LocationRecord {
        lat: 40.71,
        lon: -74.0,
        country_code: "US".into(),
        country_name: "United States".into(),
        region_code: "NY".into(),
        region_name: "New York".into(),
        city: "New York".into(),
    }
}

fn login(user: &str) -> RawEventInput {
    RawEventInput::new("login")
        .with_user(user)
        .with_app("demo")
        .with_payload(json!({"ok": true}))
}

struct Harness {
    store: Arc<InMemoryEventStore>,
    broadcaster: Arc<RecordingBroadcaster>,
    clock: Arc<ManualClock>,
    pipeline: IngestPipeline,
}

fn harness(config: IngestConfig) -> Harness {
    let store = Arc::new(InMemoryEventStore::new());
    let broadcaster = Arc::new(RecordingBroadcaster::new());
    let clock = Arc::new(ManualClock::new(start()));
    let pipeline = IngestPipeline::new(
        config,
        store.clone(),
        Arc::new(StaticGeoResolver::new(location())),
        broadcaster.clone(),
    )
    .with_clock(clock.clone());

    Harness {
        store,
        broadcaster,
        clock,
        pipeline,
    }
}

// =============================================================================
// Dedup window
// =============================================================================

#[tokio::test]
async fn test_first_event_for_key_is_recorded_once() {
    let h = harness(IngestConfig::default());

    let result = h.pipeline.accept(login("u1"), Some("8.8.8.8")).await.unwrap();

    assert!(result.accepted());
    let records = h.store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key(), EventKey::new("demo", "login", "u1"));
    assert_eq!(records[0].timestamp, start());
    assert_eq!(h.broadcaster.on_topic(EVENT_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_event_inside_window_is_skipped_without_side_effects() {
    let h = harness(IngestConfig::default().with_delay_minutes(30));

    assert!(h.pipeline.accept(login("u1"), Some("8.8.8.8")).await.unwrap().accepted());

    // Exactly at the window edge is still a duplicate
    h.clock.advance(Duration::minutes(30));
    let result = h.pipeline.accept(login("u1"), Some("8.8.8.8")).await.unwrap();

    assert!(!result.accepted());
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.broadcaster.on_topic(EVENT_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_event_after_window_is_recorded() {
    let h = harness(IngestConfig::default().with_delay_minutes(30));

    h.pipeline.accept(login("u1"), Some("8.8.8.8")).await.unwrap();
    h.clock.advance(Duration::minutes(30) + Duration::seconds(1));
    let result = h.pipeline.accept(login("u1"), Some("8.8.8.8")).await.unwrap();

    assert!(result.accepted());
    let records = h.store.records().await;
    assert_eq!(records.len(), 2);
    assert!(records[1].timestamp - records[0].timestamp > Duration::minutes(30));
    assert_eq!(h.broadcaster.on_topic(EVENT_TOPIC).len(), 2);
}

#[tokio::test]
async fn test_keys_are_independent() {
    let h = harness(IngestConfig::default());

    h.pipeline.accept(login("u1"), None).await.unwrap();
    h.pipeline.accept(login("u2"), None).await.unwrap();
    h.pipeline
        .accept(
            RawEventInput::new("logout")
                .with_user("u1")
                .with_app("demo")
                .with_payload(json!({})),
            None,
        )
        .await
        .unwrap();
    h.pipeline
        .accept(
            RawEventInput::new("login")
                .with_user("u1")
                .with_app("other")
                .with_payload(json!({})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(h.store.len().await, 4);
}

#[tokio::test]
async fn test_zero_window_records_each_new_second() {
    let h = harness(IngestConfig::default().with_delay_minutes(0));

    assert!(h.pipeline.accept(login("u1"), None).await.unwrap().accepted());
    // Same second: elapsed is zero, which is not greater than the window
    assert!(!h.pipeline.accept(login("u1"), None).await.unwrap().accepted());
    h.clock.advance(Duration::seconds(1));
    assert!(h.pipeline.accept(login("u1"), None).await.unwrap().accepted());
}

// =============================================================================
// Enrichment and payloads
// =============================================================================

#[tokio::test]
async fn test_broadcast_carries_enriched_event() {
    let h = harness(IngestConfig::default());

    h.pipeline
        .accept(
            RawEventInput::new("purchase")
                .with_user("u9")
                .with_app("shop")
                .with_payload(Value::String(r#"{"sku": "A-1", "qty": 2}"#.into())),
            Some("8.8.8.8"),
        )
        .await
        .unwrap();

    let messages = h.broadcaster.on_topic(EVENT_TOPIC);
    assert_eq!(messages.len(), 1);
    let data = &messages[0]["data"];
    assert_eq!(data["event_type"], "purchase");
    assert_eq!(data["user_id"], "u9");
    assert_eq!(data["app_name"], "shop");
    assert_eq!(data["json_data"], json!({"sku": "A-1", "qty": 2}));
    assert_eq!(data["location"]["country_code"], "US");
    assert_eq!(data["timestamp"], "2024-09-01 12:00:00");
}

#[tokio::test]
async fn test_structured_and_encoded_payloads_store_identically() {
    let h = harness(IngestConfig::default());

    h.pipeline
        .accept(
            RawEventInput::new("a")
                .with_user("u1")
                .with_app("demo")
                .with_payload(json!({"x": [1, {"z": 1, "y": 2}], "w": "s"})),
            None,
        )
        .await
        .unwrap();
    h.pipeline
        .accept(
            RawEventInput::new("b")
                .with_user("u1")
                .with_app("demo")
                .with_payload(Value::String(r#"{"w":"s","x":[1,{"y":2,"z":1}]}"#.into())),
            None,
        )
        .await
        .unwrap();

    let records = h.store.records().await;
    assert_eq!(records[0].payload, records[1].payload);
}

#[tokio::test]
async fn test_geo_failure_degrades_to_unknown_location() {
    let store = Arc::new(InMemoryEventStore::new());
    let broadcaster = Arc::new(RecordingBroadcaster::new());
    let pipeline = IngestPipeline::new(
        IngestConfig::default(),
        store.clone(),
        Arc::new(FailingGeoResolver),
        broadcaster.clone(),
    );

    let result = pipeline.accept(login("u1"), Some("203.0.113.7")).await.unwrap();

    assert!(result.accepted());
    assert!(result.event.location.is_none());
    assert_eq!(store.records().await[0].location, "null");
    assert!(broadcaster.on_topic(EVENT_TOPIC)[0]["data"]["location"].is_null());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_validation_error_has_no_side_effects() {
    let h = harness(IngestConfig::default());

    let err = h
        .pipeline
        .accept(
            RawEventInput::new("login")
                .with_app("demo")
                .with_payload(json!({})),
            Some("8.8.8.8"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Validation(_)));
    assert!(h.store.is_empty().await);
    assert!(h.broadcaster.messages().is_empty());
}

#[tokio::test]
async fn test_storage_error_propagates_without_broadcast() {
    let h = harness(IngestConfig::default());
    h.store.fail_appends(true);

    let err = h.pipeline.accept(login("u1"), None).await.unwrap_err();

    assert!(matches!(err, IngestError::Storage(StorageError::Backend(_))));
    assert!(h.broadcaster.messages().is_empty());
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_distinct_types_and_full_query_after_ingest() {
    let h = harness(IngestConfig::default());

    for (i, event_type) in ["A", "B", "A", "C"].into_iter().enumerate() {
        h.pipeline
            .accept(
                RawEventInput::new(event_type)
                    .with_user(format!("u{i}"))
                    .with_app("demo")
                    .with_payload(json!({"i": i})),
                None,
            )
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(1));
    }

    let types = h.store.distinct_types().await.unwrap();
    let expected: BTreeSet<String> = ["A", "B", "C"].into_iter().map(String::from).collect();
    assert_eq!(types, expected);

    let all = h.store.query(&EventQuery::all()).await.unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

// =============================================================================
// Concurrency
// =============================================================================

/// Store whose lookups yield for a while, widening the check-then-append gap
struct SlowStore {
    inner: InMemoryEventStore,
}

#[async_trait]
impl EventStore for SlowStore {
    async fn append(&self, record: &StoredRecord) -> Result<(), StorageError> {
        self.inner.append(record).await
    }

    async fn most_recent(&self, key: &EventKey) -> Result<Option<StoredRecord>, StorageError> {
        let found = self.inner.most_recent(key).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        found
    }

    async fn distinct_types(&self) -> Result<BTreeSet<String>, StorageError> {
        self.inner.distinct_types().await
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, StorageError> {
        self.inner.query(query).await
    }
}

#[tokio::test]
async fn test_serialized_mode_writes_once_under_concurrency() {
    let inner = InMemoryEventStore::new();
    let pipeline = Arc::new(
        IngestPipeline::new(
            IngestConfig::default().with_dedup_mode(DedupMode::Serialized),
            Arc::new(SlowStore {
                inner: inner.clone(),
            }),
            Arc::new(StaticGeoResolver::new(location())),
            Arc::new(RecordingBroadcaster::new()),
        )
        .with_clock(Arc::new(ManualClock::new(start()))),
    );

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.accept(login("u1"), None).await })
        })
        .collect();

    let mut recorded = 0;
    for result in futures::future::join_all(tasks).await {
        if result.unwrap().unwrap().accepted() {
            recorded += 1;
        }
    }

    assert_eq!(recorded, 1);
    assert_eq!(inner.len().await, 1);
}
