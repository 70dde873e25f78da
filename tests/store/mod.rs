//! `AggregateStore` behavior that spans more than one call: percentile
//! upserts on windows with no counted events, history ordering for the
//! baseline query, and the retention sweep's cutoffs.

use qos_pipeline::store::{AggregateStore, InMemoryStore, MetricKind, PercentileSet};
use qos_pipeline::telemetry::WindowKey;

#[tokio::test]
async fn percentile_upsert_creates_a_row_for_an_all_error_window() {
    let store = InMemoryStore::new();
    let key = WindowKey::new("client-a", "example.com", 0);

    store
        .upsert_percentiles(&key, MetricKind::Ttfb, PercentileSet { p50: Some(80.0), p95: Some(120.0) }, 1_000)
        .await
        .unwrap();

    let row = store.get_aggregate(&key).await.unwrap().expect("row created by upsert alone");
    assert_eq!(row.count_total, 0);
    assert_eq!(row.ttfb.p50, Some(80.0));
}

#[tokio::test]
async fn list_recent_diagnosed_returns_most_recent_first_bounded_by_count() {
    let store = InMemoryStore::new();
    for window_start_ms in (0..5 * 60_000).step_by(60_000) {
        let key = WindowKey::new("client-a", "example.com", window_start_ms);
        store
            .upsert_percentiles(&key, MetricKind::Dns, PercentileSet { p50: Some(5.0), p95: Some(10.0) }, 1_000)
            .await
            .unwrap();
        store.set_diagnosis(&key, "healthy", 1_000).await.unwrap();
    }

    let history = store
        .list_recent_diagnosed("client-a", "example.com", 5 * 60_000, 3)
        .await
        .unwrap();

    assert_eq!(history.len(), 3);
    assert_eq!(history[0].key.window_start_ms, 4 * 60_000);
    assert_eq!(history[1].key.window_start_ms, 3 * 60_000);
    assert_eq!(history[2].key.window_start_ms, 2 * 60_000);
}

#[tokio::test]
async fn undiagnosed_closed_windows_exclude_ones_already_diagnosed() {
    let store = InMemoryStore::new();
    let closed = WindowKey::new("client-a", "example.com", 0);
    let diagnosed = WindowKey::new("client-a", "other.example", 0);

    store
        .upsert_percentiles(&closed, MetricKind::Dns, PercentileSet { p50: Some(5.0), p95: Some(10.0) }, 1_000)
        .await
        .unwrap();
    store
        .upsert_percentiles(&diagnosed, MetricKind::Dns, PercentileSet { p50: Some(5.0), p95: Some(10.0) }, 1_000)
        .await
        .unwrap();
    store.set_diagnosis(&diagnosed, "healthy", 1_000).await.unwrap();

    let pending = store.list_undiagnosed_closed(70_000, 1_000).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, closed);
}

#[tokio::test]
async fn retention_purge_removes_only_what_is_older_than_the_cutoffs() {
    let store = InMemoryStore::new();
    let old_key = WindowKey::new("client-a", "example.com", 0);
    let recent_key = WindowKey::new("client-a", "example.com", 10 * 24 * 60 * 60 * 1000);

    store
        .upsert_percentiles(&old_key, MetricKind::Dns, PercentileSet { p50: Some(5.0), p95: Some(10.0) }, 1_000)
        .await
        .unwrap();
    store
        .upsert_percentiles(&recent_key, MetricKind::Dns, PercentileSet { p50: Some(5.0), p95: Some(10.0) }, 1_000)
        .await
        .unwrap();

    let now_ms = 100 * 24 * 60 * 60 * 1000;
    let (_, agg_deleted) = store.purge_retention(now_ms, now_ms - 90 * 24 * 60 * 60 * 1000).await.unwrap();

    assert_eq!(agg_deleted, 1);
    assert!(store.get_aggregate(&old_key).await.unwrap().is_none());
    assert!(store.get_aggregate(&recent_key).await.unwrap().is_some());
}
