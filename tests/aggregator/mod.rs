//! End-to-end aggregator behavior: bus -> worker loop -> store, and the
//! flush loop turning buffered samples into persisted percentiles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qos_pipeline::aggregator::{run_flush_loop, run_worker_loop, AggregatorState};
use qos_pipeline::bus::{EventBus, InMemoryBus};
use qos_pipeline::clock::{FakeClock, SharedClock};
use qos_pipeline::config::AggConfig;
use qos_pipeline::metrics::Metrics;
use qos_pipeline::store::{
    AggregateStore, ApplyOutcome, EventEffect, InMemoryStore, MetricKind, PercentileSet, StoreError,
};
use qos_pipeline::telemetry::WindowKey;
use uuid::Uuid;

use crate::common::{event, event_with_id, event_with_timings};

fn small_config(lateness_ms: i64) -> AggConfig {
    AggConfig {
        lateness_ms,
        flush_interval_ms: 5_000,
        max_samples_per_window_per_metric: 1_000,
        worker_concurrency: 1,
    }
}

async fn run_briefly(state: AggregatorState) {
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_worker_loop(state, rx));
    tokio::time::sleep(Duration::from_millis(250)).await;
    let _ = tx.send(true);
    let _ = handle.await;
}

#[tokio::test]
async fn duplicate_event_collapses_into_a_single_count() {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let clock: SharedClock = Arc::new(FakeClock::new(1_000));
    let state = AggregatorState::new(
        bus.clone(),
        store.clone(),
        clock,
        small_config(120_000),
        Arc::new(Metrics::new()),
    );

    let id = Uuid::new_v4();
    let ev = event_with_id("client-a", "example.com", 1_000, id);
    bus.publish(&ev).await.unwrap();
    bus.publish(&ev).await.unwrap();

    run_briefly(state).await;

    let key = WindowKey::for_event("client-a", "example.com", 1_000);
    let row = store.get_aggregate(&key).await.unwrap().expect("aggregate present");
    assert_eq!(row.count_total, 1);
}

#[tokio::test]
async fn mixed_success_and_error_events_split_counts() {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let clock: SharedClock = Arc::new(FakeClock::new(1_000));
    let state = AggregatorState::new(
        bus.clone(),
        store.clone(),
        clock,
        small_config(120_000),
        Arc::new(Metrics::new()),
    );

    bus.publish(&event("client-a", "example.com", 1_000)).await.unwrap();
    bus.publish(&crate::common::error_event(
        "client-a",
        "example.com",
        1_000,
        qos_pipeline::telemetry::ErrorStage::Dns,
    ))
    .await
    .unwrap();

    run_briefly(state).await;

    let key = WindowKey::for_event("client-a", "example.com", 1_000);
    let row = store.get_aggregate(&key).await.unwrap().expect("aggregate present");
    assert_eq!(row.count_total, 2);
    assert_eq!(row.count_success, 1);
    assert_eq!(row.count_error, 1);
    assert_eq!(row.error_counts.dns, 1);
}

#[tokio::test]
async fn late_event_is_acked_but_never_applied() {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    // now_ms is past window_end_ms(60_000) + lateness_ms(1_000) for an event
    // timestamped in the very first window.
    let clock: SharedClock = Arc::new(FakeClock::new(70_000));
    let state = AggregatorState::new(
        bus.clone(),
        store.clone(),
        clock,
        small_config(1_000),
        Arc::new(Metrics::new()),
    );

    bus.publish(&event("client-a", "example.com", 1_000)).await.unwrap();

    run_briefly(state).await;

    let key = WindowKey::for_event("client-a", "example.com", 1_000);
    assert!(store.get_aggregate(&key).await.unwrap().is_none());
    assert_eq!(bus.pending_len().await, 0);
}

#[tokio::test]
async fn flush_loop_computes_nearest_rank_percentiles() {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FakeClock::new(1_000));
    let shared_clock: SharedClock = clock.clone();
    let state = AggregatorState::new(
        bus.clone(),
        store.clone(),
        shared_clock,
        small_config(1_000),
        Arc::new(Metrics::new()),
    );

    for v in 1..=10 {
        let ev = event_with_timings(
            "client-a",
            "example.com",
            1_000,
            v as f64,
            v as f64,
            v as f64,
            v as f64,
            v as f64 * 100.0,
        );
        bus.publish(&ev).await.unwrap();
    }

    run_briefly(state.clone()).await;

    // Advance past the window's closable boundary before flushing.
    clock.set(62_000);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_flush_loop(state, rx));
    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = tx.send(true);
    let _ = handle.await;

    let key = WindowKey::for_event("client-a", "example.com", 1_000);
    let row = store.get_aggregate(&key).await.unwrap().expect("aggregate present");
    assert_eq!(row.dns.p50, Some(5.0));
    assert_eq!(row.dns.p95, Some(10.0));
    assert_eq!(row.throughput.p50, Some(500.0));
    assert_eq!(row.throughput.p95, Some(1000.0));
}

/// A store that always fails, used to drive an event through every
/// redelivery until it is routed to the dead-letter subject.
struct AlwaysFailingStore;

#[async_trait]
impl AggregateStore for AlwaysFailingStore {
    async fn apply_event(&self, _key: &WindowKey, _effect: &EventEffect, _now_ms: i64) -> Result<ApplyOutcome, StoreError> {
        Err(StoreError::Query("simulated outage".to_string()))
    }
    async fn get_aggregate(&self, _key: &WindowKey) -> Result<Option<qos_pipeline::store::AggregateRow>, StoreError> {
        Ok(None)
    }
    async fn upsert_percentiles(&self, _key: &WindowKey, _metric: MetricKind, _set: PercentileSet, _now_ms: i64) -> Result<(), StoreError> {
        Ok(())
    }
    async fn list_undiagnosed_closed(&self, _now_ms: i64, _lateness_ms: i64) -> Result<Vec<qos_pipeline::store::AggregateRow>, StoreError> {
        Ok(Vec::new())
    }
    async fn list_recent_diagnosed(&self, _client_id: &str, _target: &str, _before_window_start_ms: i64, _count: usize) -> Result<Vec<qos_pipeline::store::AggregateRow>, StoreError> {
        Ok(Vec::new())
    }
    async fn set_diagnosis(&self, _key: &WindowKey, _label: &str, _now_ms: i64) -> Result<(), StoreError> {
        Ok(())
    }
    async fn purge_retention(&self, _events_seen_before_ms: i64, _agg_before_ms: i64) -> Result<(u64, u64), StoreError> {
        Ok((0, 0))
    }
}

#[tokio::test]
async fn persistently_failing_store_routes_event_to_dead_letter() {
    let bus = Arc::new(InMemoryBus::new());
    let store: Arc<dyn AggregateStore> = Arc::new(AlwaysFailingStore);
    let clock: SharedClock = Arc::new(FakeClock::new(1_000));
    let state = AggregatorState::new(
        bus.clone(),
        store,
        clock,
        small_config(120_000),
        Arc::new(Metrics::new()),
    );

    bus.publish(&event("client-a", "example.com", 1_000)).await.unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_worker_loop(state, rx));
    // Five redeliveries at ~100ms idle-poll cadence plus nack round-trips;
    // give it enough wall time to exhaust max_deliver and dead-letter.
    tokio::time::sleep(Duration::from_millis(800)).await;
    let _ = tx.send(true);
    let _ = handle.await;

    assert_eq!(bus.dlq_len().await, 1);
}
