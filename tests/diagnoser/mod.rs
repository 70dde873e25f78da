//! End-to-end diagnoser pass: seed a baseline of diagnosed history windows,
//! leave one window pending, and let `run_diagnoser_loop` classify it.

use std::sync::Arc;
use std::time::Duration;

use qos_pipeline::clock::{FakeClock, SharedClock};
use qos_pipeline::config::DiagConfig;
use qos_pipeline::diagnoser::{run_diagnoser_loop, DiagnoserState, LABEL_THROUGHPUT_BOUND};
use qos_pipeline::metrics::Metrics;
use qos_pipeline::store::{AggregateStore, InMemoryStore, MetricKind, PercentileSet};
use qos_pipeline::telemetry::WindowKey;

const WINDOW_MS: i64 = 60_000;

fn config() -> DiagConfig {
    DiagConfig {
        cadence_s: 1,
        baseline_windows: 10,
        dns_share_threshold: 0.60,
        dns_baseline_factor: 1.50,
        handshake_sigma: 2.0,
        handshake_factor: 2.0,
        server_sigma: 2.0,
        throughput_drop_factor: 0.70,
    }
}

/// Seed a history row whose percentiles alternate slightly around a flat
/// mean so the baseline has nonzero spread, matching how a healthy,
/// steady-state key actually behaves.
async fn seed_history_row(store: &InMemoryStore, window_start_ms: i64, high: bool) {
    let key = WindowKey::new("client-a", "example.com", window_start_ms);
    let (latency_p95, throughput_p50) = if high { (11.0, 1_050.0) } else { (9.0, 950.0) };

    for metric in [MetricKind::Dns, MetricKind::Tcp, MetricKind::Tls, MetricKind::Ttfb] {
        store
            .upsert_percentiles(&key, metric, PercentileSet { p50: Some(latency_p95 / 2.0), p95: Some(latency_p95) }, 0)
            .await
            .unwrap();
    }
    store
        .upsert_percentiles(
            &key,
            MetricKind::Throughput,
            PercentileSet { p50: Some(throughput_p50), p95: Some(throughput_p50 + 200.0) },
            0,
        )
        .await
        .unwrap();
    store.set_diagnosis(&key, "healthy", 0).await.unwrap();
}

#[tokio::test]
async fn throughput_drop_with_stable_latency_is_diagnosed_throughput_bound() {
    let store = Arc::new(InMemoryStore::new());

    for i in 1..=10i64 {
        seed_history_row(&store, -i * WINDOW_MS, i % 2 == 0).await;
    }

    let pending_key = WindowKey::new("client-a", "example.com", 0);
    for metric in [MetricKind::Dns, MetricKind::Tcp, MetricKind::Tls, MetricKind::Ttfb] {
        store
            .upsert_percentiles(&pending_key, metric, PercentileSet { p50: Some(5.0), p95: Some(10.0) }, 0)
            .await
            .unwrap();
    }
    store
        .upsert_percentiles(
            &pending_key,
            MetricKind::Throughput,
            PercentileSet { p50: Some(500.0), p95: Some(600.0) },
            0,
        )
        .await
        .unwrap();

    let clock: SharedClock = Arc::new(FakeClock::new(WINDOW_MS + 1));
    let state = DiagnoserState {
        store: store.clone(),
        clock,
        config: config(),
        lateness_ms: 0,
        metrics: Arc::new(Metrics::new()),
    };

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_diagnoser_loop(state, rx));
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let _ = tx.send(true);
    let _ = handle.await;

    let row = store.get_aggregate(&pending_key).await.unwrap().expect("pending row present");
    assert_eq!(row.diagnosis_label.as_deref(), Some(LABEL_THROUGHPUT_BOUND));
}

#[tokio::test]
async fn window_without_enough_history_is_left_undiagnosed() {
    let store = Arc::new(InMemoryStore::new());
    seed_history_row(&store, -WINDOW_MS, false).await;
    let pending_key = WindowKey::new("client-a", "example.com", 0);
    store
        .upsert_percentiles(&pending_key, MetricKind::Dns, PercentileSet { p50: Some(5.0), p95: Some(10.0) }, 0)
        .await
        .unwrap();

    let clock: SharedClock = Arc::new(FakeClock::new(WINDOW_MS + 1));
    let state = DiagnoserState {
        store: store.clone(),
        clock,
        config: config(),
        lateness_ms: 0,
        metrics: Arc::new(Metrics::new()),
    };

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_diagnoser_loop(state, rx));
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let _ = tx.send(true);
    let _ = handle.await;

    let row = store.get_aggregate(&pending_key).await.unwrap().expect("pending row present");
    assert!(row.diagnosis_label.is_none());
}
