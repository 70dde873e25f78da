use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{AggregateRow, ApplyOutcome, EventEffect, MetricKind, PercentileSet, StoreError};
use crate::store::AggregateStore;
use crate::telemetry::WindowKey;

struct Inner {
    aggregates: HashMap<WindowKey, AggregateRow>,
    dedup: HashMap<Uuid, i64>,
}

/// In-memory stand-in for the production PostgreSQL store. A single mutex
/// is enough here: this is a test fake, not the production concurrency
/// path (that lives in the per-key latch in front of the real store).
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                aggregates: HashMap::new(),
                dedup: HashMap::new(),
            }),
        }
    }

    pub async fn dedup_len(&self) -> usize {
        self.inner.lock().await.dedup.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AggregateStore for InMemoryStore {
    async fn apply_event(
        &self,
        key: &WindowKey,
        effect: &EventEffect,
        now_ms: i64,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.dedup.contains_key(&effect.event_id) {
            return Ok(ApplyOutcome::Duplicate);
        }
        inner.dedup.insert(effect.event_id, effect.ts_ms);

        let row = inner
            .aggregates
            .entry(key.clone())
            .or_insert_with(|| AggregateRow::empty(key.clone(), now_ms));
        row.count_total += 1;
        if effect.is_error {
            row.count_error += 1;
            if let Some(stage) = effect.error_stage {
                row.error_counts.increment(stage);
            }
        } else {
            row.count_success += 1;
        }
        row.updated_at_ms = now_ms;
        Ok(ApplyOutcome::Applied)
    }

    async fn get_aggregate(&self, key: &WindowKey) -> Result<Option<AggregateRow>, StoreError> {
        Ok(self.inner.lock().await.aggregates.get(key).cloned())
    }

    async fn upsert_percentiles(
        &self,
        key: &WindowKey,
        metric: MetricKind,
        set: PercentileSet,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .aggregates
            .entry(key.clone())
            .or_insert_with(|| AggregateRow::empty(key.clone(), now_ms));
        row.set_percentile_set(metric, set);
        row.updated_at_ms = now_ms;
        Ok(())
    }

    async fn list_undiagnosed_closed(
        &self,
        now_ms: i64,
        lateness_ms: i64,
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<AggregateRow> = inner
            .aggregates
            .values()
            .filter(|row| {
                row.diagnosis_label.is_none() && row.key.window_end_ms() + lateness_ms <= now_ms
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.key.window_start_ms);
        Ok(rows)
    }

    async fn list_recent_diagnosed(
        &self,
        client_id: &str,
        target: &str,
        before_window_start_ms: i64,
        count: usize,
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<AggregateRow> = inner
            .aggregates
            .values()
            .filter(|row| {
                row.key.client_id == client_id
                    && row.key.target == target
                    && row.key.window_start_ms < before_window_start_ms
                    && row.diagnosis_label.is_some()
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.key.window_start_ms));
        rows.truncate(count);
        Ok(rows)
    }

    async fn set_diagnosis(&self, key: &WindowKey, label: &str, now_ms: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .aggregates
            .get_mut(key)
            .ok_or_else(|| StoreError::Query(format!("no aggregate for {key:?}")))?;
        row.diagnosis_label = Some(label.to_string());
        row.updated_at_ms = now_ms;
        Ok(())
    }

    async fn purge_retention(
        &self,
        events_seen_before_ms: i64,
        agg_before_ms: i64,
    ) -> Result<(u64, u64), StoreError> {
        let mut inner = self.inner.lock().await;
        let before_dedup = inner.dedup.len();
        inner.dedup.retain(|_, seen_at| *seen_at >= events_seen_before_ms);
        let dedup_deleted = (before_dedup - inner.dedup.len()) as u64;

        let before_agg = inner.aggregates.len();
        inner
            .aggregates
            .retain(|key, _| key.window_start_ms >= agg_before_ms);
        let agg_deleted = (before_agg - inner.aggregates.len()) as u64;

        Ok((dedup_deleted, agg_deleted))
    }
}
