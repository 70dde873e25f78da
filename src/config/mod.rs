//! Typed configuration for the pipeline, loaded from a TOML file and then
//! overridden by environment variables (`PIPELINE__SECTION__FIELD`, double
//! underscore nested, matching the strict-parse discipline used throughout
//! this codebase rather than accepting loose truthy strings).

mod defaults;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const CONFIG_PATH_ENV: &str = "PIPELINE_CONFIG_PATH";
const ENV_PREFIX: &str = "PIPELINE__";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ingest: IngestConfig,
    pub bus: BusConfig,
    pub agg: AggConfig,
    pub diag: DiagConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub listen_addr: String,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
    pub body_max_bytes: usize,
    pub publish_timeout_ms: u64,
    /// Reject unknown-and-unsupported `schema_version`s outright instead of
    /// the default forward-compatible "log and accept" behavior.
    pub strict_schema_version: bool,
    /// Bearer tokens accepted for `Authorization: Bearer <token>`. Empty
    /// disables authentication (useful for local development).
    pub auth_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub nats_url: String,
    pub stream_name: String,
    pub subject: String,
    pub dlq_subject: String,
    pub consumer_name: String,
    pub max_ack_pending: u64,
    pub ack_wait_s: u64,
    pub max_deliver: u32,
    pub stream_retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggConfig {
    pub lateness_ms: i64,
    pub flush_interval_ms: u64,
    pub max_samples_per_window_per_metric: usize,
    /// Worker tasks consuming from the bus concurrently; bounded by
    /// `bus.max_ack_pending` in practice.
    pub worker_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    pub cadence_s: u64,
    pub baseline_windows: usize,
    pub dns_share_threshold: f64,
    pub dns_baseline_factor: f64,
    pub handshake_sigma: f64,
    pub handshake_factor: f64,
    pub server_sigma: f64,
    pub throughput_drop_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub events_seen_retention_days: u32,
    pub agg_retention_days: u32,
    pub pool_max_connections: u32,
}

impl PipelineConfig {
    /// Load from `path` if it exists, otherwise start from defaults; either
    /// way, environment overrides are applied on top and the result is
    /// validated before being handed back.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let path = path
            .map(PathBuf::from)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| format!("reading config {}: {e}", path.display()))?;
            toml::from_str(&raw).map_err(|e| format!("parsing config {}: {e}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, field)) = rest.split_once("__") else {
                continue;
            };
            self.apply_one_override(section, field, &value);
        }
    }

    fn apply_one_override(&mut self, section: &str, field: &str, value: &str) {
        macro_rules! set_num {
            ($target:expr) => {
                if let Ok(v) = value.parse() {
                    $target = v;
                }
            };
        }
        macro_rules! set_bool {
            ($target:expr) => {
                match value.to_ascii_lowercase().as_str() {
                    "true" => $target = true,
                    "false" => $target = false,
                    _ => {}
                }
            };
        }

        match (section.to_ascii_lowercase().as_str(), field.to_ascii_lowercase().as_str()) {
            ("ingest", "listen_addr") => self.ingest.listen_addr = value.to_string(),
            ("ingest", "rate_limit_rps") => set_num!(self.ingest.rate_limit_rps),
            ("ingest", "rate_limit_burst") => set_num!(self.ingest.rate_limit_burst),
            ("ingest", "body_max_bytes") => set_num!(self.ingest.body_max_bytes),
            ("ingest", "publish_timeout_ms") => set_num!(self.ingest.publish_timeout_ms),
            ("ingest", "strict_schema_version") => set_bool!(self.ingest.strict_schema_version),
            ("bus", "nats_url") => self.bus.nats_url = value.to_string(),
            ("bus", "max_ack_pending") => set_num!(self.bus.max_ack_pending),
            ("bus", "ack_wait_s") => set_num!(self.bus.ack_wait_s),
            ("bus", "max_deliver") => set_num!(self.bus.max_deliver),
            ("agg", "lateness_ms") => set_num!(self.agg.lateness_ms),
            ("agg", "flush_interval_ms") => set_num!(self.agg.flush_interval_ms),
            ("agg", "max_samples_per_window_per_metric") => {
                set_num!(self.agg.max_samples_per_window_per_metric)
            }
            ("diag", "cadence_s") => set_num!(self.diag.cadence_s),
            ("diag", "baseline_windows") => set_num!(self.diag.baseline_windows),
            ("store", "database_url") => self.store.database_url = value.to_string(),
            ("store", "events_seen_retention_days") => {
                set_num!(self.store.events_seen_retention_days)
            }
            ("store", "agg_retention_days") => set_num!(self.store.agg_retention_days),
            _ => {}
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.ingest.rate_limit_burst == 0 {
            return Err("ingest.rate_limit_burst must be > 0".into());
        }
        if self.ingest.rate_limit_rps <= 0.0 {
            return Err("ingest.rate_limit_rps must be > 0".into());
        }
        if self.agg.max_samples_per_window_per_metric == 0 {
            return Err("agg.max_samples_per_window_per_metric must be > 0".into());
        }
        if self.agg.lateness_ms < 0 {
            return Err("agg.lateness_ms must be >= 0".into());
        }
        if self.diag.baseline_windows == 0 {
            return Err("diag.baseline_windows must be > 0".into());
        }
        if self.bus.max_deliver == 0 {
            return Err("bus.max_deliver must be > 0".into());
        }
        Ok(())
    }
}
