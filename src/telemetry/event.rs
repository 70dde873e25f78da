//! The `TelemetryEvent` wire schema (SPEC_FULL.md §3.1) and its validation
//! rules. An event exists only in flight — ingest decodes it, the aggregator
//! folds it into aggregates, and it is never stored verbatim.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current major schema version this build understands. A `schema_version`
/// with a higher minor (e.g. "1.7" when we know up to "1.3") is accepted as
/// forward-compatible; a different major is rejected outright.
const CURRENT_MAJOR: u32 = 1;
const KNOWN_MAX_MINOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Dns,
    Tcp,
    Tls,
    Http,
    Throughput,
}

impl ErrorStage {
    pub const ALL: [ErrorStage; 5] = [
        ErrorStage::Dns,
        ErrorStage::Tcp,
        ErrorStage::Tls,
        ErrorStage::Http,
        ErrorStage::Throughput,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorStage::Dns => "dns",
            ErrorStage::Tcp => "tcp",
            ErrorStage::Tls => "tls",
            ErrorStage::Http => "http",
            ErrorStage::Throughput => "throughput",
        }
    }
}

/// Phase timings in milliseconds. Any field left `None` is "not measured"
/// for this event, not zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default)]
    pub dns_ms: Option<f64>,
    #[serde(default)]
    pub tcp_ms: Option<f64>,
    #[serde(default)]
    pub tls_ms: Option<f64>,
    #[serde(default)]
    pub ttfb_ms: Option<f64>,
}

impl Timings {
    pub fn is_empty(&self) -> bool {
        self.dns_ms.is_none() && self.tcp_ms.is_none() && self.tls_ms.is_none() && self.ttfb_ms.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkContext {
    #[serde(default)]
    pub interface_type: Option<String>,
    #[serde(default)]
    pub vpn: Option<bool>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryEvent {
    pub schema_version: String,
    pub event_id: Uuid,
    pub client_id: String,
    pub target: String,
    pub ts_ms: i64,
    /// Stamped by ingest on receipt; absent on the wire, always `Some` once
    /// the event has passed through ingest.
    #[serde(default)]
    pub recv_ts_ms: Option<i64>,
    #[serde(default)]
    pub network_context: Option<NetworkContext>,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub throughput_kbps: Option<f64>,
    #[serde(default)]
    pub error_stage: Option<ErrorStage>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported schema_version: {0}")]
    UnsupportedSchemaVersion(String),
    #[error("event_id is not a valid UUID")]
    InvalidEventId,
    #[error("ts_ms {ts_ms} is outside the allowed window [{min}, {max}]")]
    TsOutOfRange { ts_ms: i64, min: i64, max: i64 },
    #[error("event has neither a measured timing/throughput nor an error_stage")]
    NoSignal,
    #[error("client_id must not be empty")]
    EmptyClientId,
    #[error("target must not be empty")]
    EmptyTarget,
}

/// Outcome of version compatibility checking, distinct from acceptance: a
/// `Future` version is accepted but should be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersionOutcome {
    Known,
    Future,
    Unsupported,
}

pub fn classify_schema_version(version: &str) -> SchemaVersionOutcome {
    let Some((major_str, minor_str)) = version.split_once('.') else {
        return SchemaVersionOutcome::Unsupported;
    };
    let (Ok(major), Ok(minor)) = (major_str.parse::<u32>(), minor_str.parse::<u32>()) else {
        return SchemaVersionOutcome::Unsupported;
    };
    if major != CURRENT_MAJOR {
        return SchemaVersionOutcome::Unsupported;
    }
    if minor > KNOWN_MAX_MINOR {
        SchemaVersionOutcome::Future
    } else {
        SchemaVersionOutcome::Known
    }
}

const MAX_CLOCK_SKEW_BACK_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_CLOCK_SKEW_FWD_MS: i64 = 5 * 60 * 1000;

impl TelemetryEvent {
    /// Validate against SPEC_FULL.md §3.1's invariant. `strict` rejects
    /// forward-compatible (future minor) schema versions too, per
    /// `ingest.strict_schema_version`. `now_ms` comes from the injected
    /// clock so the clock-skew bounds are deterministic under test.
    pub fn validate(&self, now_ms: i64, strict: bool) -> Result<SchemaVersionOutcome, ValidationError> {
        let outcome = classify_schema_version(&self.schema_version);
        match outcome {
            SchemaVersionOutcome::Unsupported => {
                return Err(ValidationError::UnsupportedSchemaVersion(
                    self.schema_version.clone(),
                ))
            }
            SchemaVersionOutcome::Future if strict => {
                return Err(ValidationError::UnsupportedSchemaVersion(
                    self.schema_version.clone(),
                ))
            }
            SchemaVersionOutcome::Known | SchemaVersionOutcome::Future => {}
        }

        if self.client_id.trim().is_empty() {
            return Err(ValidationError::EmptyClientId);
        }
        if self.target.trim().is_empty() {
            return Err(ValidationError::EmptyTarget);
        }

        let min = now_ms - MAX_CLOCK_SKEW_BACK_MS;
        let max = now_ms + MAX_CLOCK_SKEW_FWD_MS;
        if self.ts_ms < min || self.ts_ms > max {
            return Err(ValidationError::TsOutOfRange {
                ts_ms: self.ts_ms,
                min,
                max,
            });
        }

        if self.timings.is_empty() && self.throughput_kbps.is_none() && self.error_stage.is_none() {
            return Err(ValidationError::NoSignal);
        }

        Ok(outcome)
    }
}
