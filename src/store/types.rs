use async_trait::async_trait;

use crate::telemetry::{ErrorStage, WindowKey};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connect(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
}

/// Result of applying one event's counter effect (SPEC_FULL.md §4.3 step 4).
/// `Late` events never reach the store at all — the aggregator filters them
/// before calling `apply_event`, so this only distinguishes the dedup path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PercentileSet {
    pub p50: Option<f64>,
    pub p95: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Dns,
    Tcp,
    Tls,
    Ttfb,
    Throughput,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Dns,
        MetricKind::Tcp,
        MetricKind::Tls,
        MetricKind::Ttfb,
        MetricKind::Throughput,
    ];
}

#[derive(Debug, Clone, Default)]
pub struct ErrorStageCounts {
    pub dns: i64,
    pub tcp: i64,
    pub tls: i64,
    pub http: i64,
    pub throughput: i64,
}

impl ErrorStageCounts {
    pub fn increment(&mut self, stage: ErrorStage) {
        match stage {
            ErrorStage::Dns => self.dns += 1,
            ErrorStage::Tcp => self.tcp += 1,
            ErrorStage::Tls => self.tls += 1,
            ErrorStage::Http => self.http += 1,
            ErrorStage::Throughput => self.throughput += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateRow {
    pub key: WindowKey,
    pub count_total: i64,
    pub count_success: i64,
    pub count_error: i64,
    pub error_counts: ErrorStageCounts,
    pub dns: PercentileSet,
    pub tcp: PercentileSet,
    pub tls: PercentileSet,
    pub ttfb: PercentileSet,
    pub throughput: PercentileSet,
    pub diagnosis_label: Option<String>,
    pub updated_at_ms: i64,
}

impl AggregateRow {
    pub fn empty(key: WindowKey, now_ms: i64) -> Self {
        Self {
            key,
            count_total: 0,
            count_success: 0,
            count_error: 0,
            error_counts: ErrorStageCounts::default(),
            dns: PercentileSet::default(),
            tcp: PercentileSet::default(),
            tls: PercentileSet::default(),
            ttfb: PercentileSet::default(),
            throughput: PercentileSet::default(),
            diagnosis_label: None,
            updated_at_ms: now_ms,
        }
    }

    pub fn percentile_set(&self, metric: MetricKind) -> PercentileSet {
        match metric {
            MetricKind::Dns => self.dns,
            MetricKind::Tcp => self.tcp,
            MetricKind::Tls => self.tls,
            MetricKind::Ttfb => self.ttfb,
            MetricKind::Throughput => self.throughput,
        }
    }

    pub fn set_percentile_set(&mut self, metric: MetricKind, set: PercentileSet) {
        match metric {
            MetricKind::Dns => self.dns = set,
            MetricKind::Tcp => self.tcp = set,
            MetricKind::Tls => self.tls = set,
            MetricKind::Ttfb => self.ttfb = set,
            MetricKind::Throughput => self.throughput = set,
        }
    }
}

/// One event's worth of counter effect, already classified as success/error
/// by the aggregator before the store is asked to apply it.
#[derive(Debug, Clone)]
pub struct EventEffect {
    pub event_id: uuid::Uuid,
    pub client_id: String,
    /// The event's own `ts_ms`, stored on the dedup record (SPEC_FULL.md
    /// §3.1 `DedupRecord.ts_ms`) — not the time the aggregator processed it.
    pub ts_ms: i64,
    pub is_error: bool,
    pub error_stage: Option<ErrorStage>,
}

/// Transactional store for the dedup set and windowed aggregates. The dedup
/// insert and the counter upsert in [`apply_event`](AggregateStore::apply_event)
/// must happen in one transaction (I4): either both land or neither does.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Apply one event's counter effect to the aggregate row for `key`,
    /// first attempting to insert `effect.event_id` into the dedup set.
    /// Returns `Duplicate` without mutating the aggregate if the id was
    /// already present.
    async fn apply_event(
        &self,
        key: &WindowKey,
        effect: &EventEffect,
        now_ms: i64,
    ) -> Result<ApplyOutcome, StoreError>;

    async fn get_aggregate(&self, key: &WindowKey) -> Result<Option<AggregateRow>, StoreError>;

    /// Upsert freshly computed percentiles for one metric onto the
    /// aggregate row for `key`, creating the row if it does not exist yet
    /// (an all-error window never produces samples but must still flush).
    async fn upsert_percentiles(
        &self,
        key: &WindowKey,
        metric: MetricKind,
        set: PercentileSet,
        now_ms: i64,
    ) -> Result<(), StoreError>;

    /// Closed windows (`window_end_ms + lateness_ms <= now_ms`) that have no
    /// `diagnosis_label` yet, oldest first.
    async fn list_undiagnosed_closed(
        &self,
        now_ms: i64,
        lateness_ms: i64,
    ) -> Result<Vec<AggregateRow>, StoreError>;

    /// Up to `count` most recent diagnosed windows for `(client_id, target)`
    /// strictly before `before_window_start_ms`, used to build a baseline.
    async fn list_recent_diagnosed(
        &self,
        client_id: &str,
        target: &str,
        before_window_start_ms: i64,
        count: usize,
    ) -> Result<Vec<AggregateRow>, StoreError>;

    async fn set_diagnosis(&self, key: &WindowKey, label: &str, now_ms: i64) -> Result<(), StoreError>;

    /// Batched, transactional retention sweep. Returns `(events_seen_deleted,
    /// agg_deleted)`.
    async fn purge_retention(
        &self,
        events_seen_before_ms: i64,
        agg_before_ms: i64,
    ) -> Result<(u64, u64), StoreError>;
}
