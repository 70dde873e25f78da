//! Default values for every configuration key enumerated in SPEC_FULL.md §6.

use super::{AggConfig, BusConfig, DiagConfig, IngestConfig, PipelineConfig, StoreConfig};

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            bus: BusConfig::default(),
            agg: AggConfig::default(),
            diag: DiagConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            rate_limit_rps: 100.0,
            rate_limit_burst: 20,
            body_max_bytes: 65_536,
            publish_timeout_ms: 5_000,
            strict_schema_version: false,
            auth_tokens: Vec::new(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://127.0.0.1:4222".to_string(),
            stream_name: "telemetry-events".to_string(),
            subject: "telemetry.events".to_string(),
            dlq_subject: "telemetry.dlq".to_string(),
            consumer_name: "aggregator".to_string(),
            max_ack_pending: 1_000,
            ack_wait_s: 30,
            max_deliver: 5,
            stream_retention_days: 7,
        }
    }
}

impl Default for AggConfig {
    fn default() -> Self {
        Self {
            lateness_ms: 120_000,
            flush_interval_ms: 5_000,
            max_samples_per_window_per_metric: 10_000,
            worker_concurrency: 16,
        }
    }
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            cadence_s: 60,
            baseline_windows: 10,
            dns_share_threshold: 0.60,
            dns_baseline_factor: 1.50,
            handshake_sigma: 2.0,
            handshake_factor: 2.0,
            server_sigma: 2.0,
            throughput_drop_factor: 0.70,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/qos_pipeline".to_string(),
            events_seen_retention_days: 7,
            agg_retention_days: 90,
            pool_max_connections: 10,
        }
    }
}
