//! Shared fixtures for the integration suite: a fake clock and a builder for
//! `TelemetryEvent`s so each scenario only has to spell out what it cares
//! about.

use qos_pipeline::telemetry::{ErrorStage, NetworkContext, TelemetryEvent, Timings};
use uuid::Uuid;

pub fn event(client_id: &str, target: &str, ts_ms: i64) -> TelemetryEvent {
    TelemetryEvent {
        schema_version: "1.0".to_string(),
        event_id: Uuid::new_v4(),
        client_id: client_id.to_string(),
        target: target.to_string(),
        ts_ms,
        recv_ts_ms: None,
        network_context: None::<NetworkContext>,
        timings: Timings {
            dns_ms: Some(10.0),
            tcp_ms: Some(20.0),
            tls_ms: Some(30.0),
            ttfb_ms: Some(80.0),
        },
        throughput_kbps: Some(5_000.0),
        error_stage: None,
    }
}

pub fn event_with_id(client_id: &str, target: &str, ts_ms: i64, event_id: Uuid) -> TelemetryEvent {
    TelemetryEvent { event_id, ..event(client_id, target, ts_ms) }
}

pub fn error_event(client_id: &str, target: &str, ts_ms: i64, stage: ErrorStage) -> TelemetryEvent {
    TelemetryEvent {
        timings: Timings::default(),
        throughput_kbps: None,
        error_stage: Some(stage),
        ..event(client_id, target, ts_ms)
    }
}

pub fn event_with_timings(
    client_id: &str,
    target: &str,
    ts_ms: i64,
    dns_ms: f64,
    tcp_ms: f64,
    tls_ms: f64,
    ttfb_ms: f64,
    throughput_kbps: f64,
) -> TelemetryEvent {
    TelemetryEvent {
        timings: Timings {
            dns_ms: Some(dns_ms),
            tcp_ms: Some(tcp_ms),
            tls_ms: Some(tls_ms),
            ttfb_ms: Some(ttfb_ms),
        },
        throughput_kbps: Some(throughput_kbps),
        ..event(client_id, target, ts_ms)
    }
}
