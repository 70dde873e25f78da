use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use super::types::{
    AggregateRow, ApplyOutcome, ErrorStageCounts, EventEffect, MetricKind, PercentileSet, StoreError,
};
use crate::config::StoreConfig;
use crate::store::AggregateStore;
use crate::telemetry::WindowKey;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))
    }

    fn row_to_aggregate(row: &sqlx::postgres::PgRow) -> Result<AggregateRow, StoreError> {
        let key = WindowKey::new(
            row.try_get::<String, _>("client_id").map_err(query_err)?,
            row.try_get::<String, _>("target").map_err(query_err)?,
            row.try_get::<i64, _>("window_start_ts").map_err(query_err)?,
        );
        Ok(AggregateRow {
            key,
            count_total: row.try_get("count_total").map_err(query_err)?,
            count_success: row.try_get("count_success").map_err(query_err)?,
            count_error: row.try_get("count_error").map_err(query_err)?,
            error_counts: ErrorStageCounts {
                dns: row.try_get("dns_error_count").map_err(query_err)?,
                tcp: row.try_get("tcp_error_count").map_err(query_err)?,
                tls: row.try_get("tls_error_count").map_err(query_err)?,
                http: row.try_get("http_error_count").map_err(query_err)?,
                throughput: row.try_get("throughput_error_count").map_err(query_err)?,
            },
            dns: PercentileSet {
                p50: row.try_get("dns_p50").map_err(query_err)?,
                p95: row.try_get("dns_p95").map_err(query_err)?,
            },
            tcp: PercentileSet {
                p50: row.try_get("tcp_p50").map_err(query_err)?,
                p95: row.try_get("tcp_p95").map_err(query_err)?,
            },
            tls: PercentileSet {
                p50: row.try_get("tls_p50").map_err(query_err)?,
                p95: row.try_get("tls_p95").map_err(query_err)?,
            },
            ttfb: PercentileSet {
                p50: row.try_get("ttfb_p50").map_err(query_err)?,
                p95: row.try_get("ttfb_p95").map_err(query_err)?,
            },
            throughput: PercentileSet {
                p50: row.try_get("throughput_p50").map_err(query_err)?,
                p95: row.try_get("throughput_p95").map_err(query_err)?,
            },
            diagnosis_label: row.try_get("diagnosis_label").map_err(query_err)?,
            updated_at_ms: row
                .try_get::<chrono::DateTime<chrono::Utc>, _>("updated_at")
                .map_err(query_err)?
                .timestamp_millis(),
        })
    }
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn error_column(metric: MetricKind) -> &'static str {
    match metric {
        MetricKind::Dns => "dns",
        MetricKind::Tcp => "tcp",
        MetricKind::Tls => "tls",
        MetricKind::Ttfb => "ttfb",
        MetricKind::Throughput => "throughput",
    }
}

#[async_trait]
impl AggregateStore for PostgresStore {
    async fn apply_event(
        &self,
        key: &WindowKey,
        effect: &EventEffect,
        _now_ms: i64,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        let inserted = sqlx::query(
            "INSERT INTO events_seen (event_id, client_id, ts_ms) VALUES ($1, $2, $3) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(effect.event_id)
        .bind(&effect.client_id)
        .bind(effect.ts_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Transaction(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(|e| StoreError::Transaction(e.to_string()))?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let (success_delta, error_delta, stage_column) = if effect.is_error {
            (0_i64, 1_i64, effect.error_stage.map(error_column))
        } else {
            (1_i64, 0_i64, None)
        };

        let query = if let Some(col) = stage_column {
            format!(
                "INSERT INTO agg_1m (client_id, target, window_start_ts, count_total, count_success, \
                 count_error, {col}_error_count, updated_at) \
                 VALUES ($1, $2, $3, 1, $4, $5, $6, now()) \
                 ON CONFLICT (client_id, target, window_start_ts) DO UPDATE SET \
                 count_total = agg_1m.count_total + 1, \
                 count_success = agg_1m.count_success + $4, \
                 count_error = agg_1m.count_error + $5, \
                 {col}_error_count = agg_1m.{col}_error_count + $6, \
                 updated_at = now()"
            )
        } else {
            "INSERT INTO agg_1m (client_id, target, window_start_ts, count_total, count_success, \
             count_error, updated_at) \
             VALUES ($1, $2, $3, 1, $4, $5, now()) \
             ON CONFLICT (client_id, target, window_start_ts) DO UPDATE SET \
             count_total = agg_1m.count_total + 1, \
             count_success = agg_1m.count_success + $4, \
             count_error = agg_1m.count_error + $5, \
             updated_at = now()"
                .to_string()
        };

        sqlx::query(&query)
            .bind(&key.client_id)
            .bind(&key.target)
            .bind(key.window_start_ms)
            .bind(success_delta)
            .bind(error_delta)
            .bind(if stage_column.is_some() { 1_i64 } else { 0_i64 })
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(ApplyOutcome::Applied)
    }

    async fn get_aggregate(&self, key: &WindowKey) -> Result<Option<AggregateRow>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM agg_1m WHERE client_id = $1 AND target = $2 AND window_start_ts = $3",
        )
        .bind(&key.client_id)
        .bind(&key.target)
        .bind(key.window_start_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        row.as_ref().map(Self::row_to_aggregate).transpose()
    }

    async fn upsert_percentiles(
        &self,
        key: &WindowKey,
        metric: MetricKind,
        set: PercentileSet,
        _now_ms: i64,
    ) -> Result<(), StoreError> {
        let col = error_column(metric);
        let query = format!(
            "INSERT INTO agg_1m (client_id, target, window_start_ts, {col}_p50, {col}_p95, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now()) \
             ON CONFLICT (client_id, target, window_start_ts) DO UPDATE SET \
             {col}_p50 = $4, {col}_p95 = $5, updated_at = now()"
        );
        sqlx::query(&query)
            .bind(&key.client_id)
            .bind(&key.target)
            .bind(key.window_start_ms)
            .bind(set.p50)
            .bind(set.p95)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_undiagnosed_closed(
        &self,
        now_ms: i64,
        lateness_ms: i64,
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let cutoff = now_ms - lateness_ms - 60_000;
        let rows = sqlx::query(
            "SELECT * FROM agg_1m WHERE diagnosis_label IS NULL AND window_start_ts <= $1 \
             ORDER BY window_start_ts ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;
        rows.iter().map(Self::row_to_aggregate).collect()
    }

    async fn list_recent_diagnosed(
        &self,
        client_id: &str,
        target: &str,
        before_window_start_ms: i64,
        count: usize,
    ) -> Result<Vec<AggregateRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM agg_1m WHERE client_id = $1 AND target = $2 AND window_start_ts < $3 \
             AND diagnosis_label IS NOT NULL ORDER BY window_start_ts DESC LIMIT $4",
        )
        .bind(client_id)
        .bind(target)
        .bind(before_window_start_ms)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;
        rows.iter().map(Self::row_to_aggregate).collect()
    }

    async fn set_diagnosis(&self, key: &WindowKey, label: &str, _now_ms: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE agg_1m SET diagnosis_label = $4, updated_at = now() \
             WHERE client_id = $1 AND target = $2 AND window_start_ts = $3",
        )
        .bind(&key.client_id)
        .bind(&key.target)
        .bind(key.window_start_ms)
        .bind(label)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn purge_retention(
        &self,
        events_seen_before_ms: i64,
        agg_before_ms: i64,
    ) -> Result<(u64, u64), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        let events_deleted = sqlx::query("DELETE FROM events_seen WHERE ts_ms < $1")
            .bind(events_seen_before_ms)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?
            .rows_affected();

        let agg_deleted = sqlx::query("DELETE FROM agg_1m WHERE window_start_ts < $1")
            .bind(agg_before_ms)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Transaction(e.to_string()))?
            .rows_affected();

        tx.commit().await.map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok((events_deleted, agg_deleted))
    }
}
