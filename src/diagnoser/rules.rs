//! Ordered rule matching against a rolling baseline (SPEC_FULL.md §4.5
//! step 2). The first matching rule wins; `healthy` is the default.

use super::baseline::Baseline;
use crate::config::DiagConfig;
use crate::store::{AggregateRow, MetricKind};

pub const LABEL_DNS_BOUND: &str = "DNS-bound";
pub const LABEL_HANDSHAKE_BOUND: &str = "Handshake-bound";
pub const LABEL_SERVER_BOUND: &str = "Server-bound";
pub const LABEL_THROUGHPUT_BOUND: &str = "Throughput-bound";
pub const LABEL_HEALTHY: &str = "healthy";

/// `current` exceeds its baseline mean by at least `sigma` sample standard
/// deviations. `false` if either the current value or the baseline is
/// missing (no percentile computed / not enough history).
fn exceeds_by_sigma(current: Option<f64>, baseline_mean: Option<f64>, baseline_stddev: Option<f64>, sigma: f64) -> bool {
    match (current, baseline_mean, baseline_stddev) {
        (Some(c), Some(mean), Some(stddev)) => c >= mean + sigma * stddev,
        _ => false,
    }
}

fn within_sigma(current: Option<f64>, baseline_mean: Option<f64>, baseline_stddev: Option<f64>, sigma: f64) -> bool {
    match (current, baseline_mean, baseline_stddev) {
        (Some(c), Some(mean), Some(stddev)) => c <= mean + sigma * stddev,
        // No baseline spread to compare against: treat as "not exceeding".
        _ => true,
    }
}

fn exceeds_by_factor(current: Option<f64>, baseline_mean: Option<f64>, factor: f64) -> bool {
    match (current, baseline_mean) {
        (Some(c), Some(mean)) => c >= factor * mean,
        _ => false,
    }
}

fn at_most_factor(current: Option<f64>, baseline_mean: Option<f64>, factor: f64) -> bool {
    match (current, baseline_mean) {
        (Some(c), Some(mean)) => c <= factor * mean,
        _ => false,
    }
}

fn dns_bound(row: &AggregateRow, baseline: &Baseline, config: &DiagConfig) -> bool {
    let dns_p95 = row.dns.p95;
    let total_p95 = match (row.dns.p95, row.tcp.p95, row.tls.p95, row.ttfb.p95) {
        (Some(d), Some(t), Some(l), Some(f)) => Some(d + t + l + f),
        _ => None,
    };
    let dominates_total = match (dns_p95, total_p95) {
        (Some(d), Some(total)) if total > 0.0 => d >= config.dns_share_threshold * total,
        _ => false,
    };
    dominates_total && exceeds_by_factor(dns_p95, baseline.dns.mean_p95, config.dns_baseline_factor)
}

fn handshake_bound(row: &AggregateRow, baseline: &Baseline, config: &DiagConfig) -> bool {
    let tcp_exceeds = exceeds_by_sigma(row.tcp.p95, baseline.tcp.mean_p95, baseline.tcp.stddev_p95, config.handshake_sigma)
        || exceeds_by_factor(row.tcp.p95, baseline.tcp.mean_p95, config.handshake_factor);
    let tls_exceeds = exceeds_by_sigma(row.tls.p95, baseline.tls.mean_p95, baseline.tls.stddev_p95, config.handshake_sigma)
        || exceeds_by_factor(row.tls.p95, baseline.tls.mean_p95, config.handshake_factor);
    tcp_exceeds || tls_exceeds
}

fn server_bound(row: &AggregateRow, baseline: &Baseline, config: &DiagConfig) -> bool {
    let ttfb_exceeds = exceeds_by_sigma(row.ttfb.p95, baseline.ttfb.mean_p95, baseline.ttfb.stddev_p95, config.server_sigma);
    let tcp_within = within_sigma(row.tcp.p95, baseline.tcp.mean_p95, baseline.tcp.stddev_p95, 1.0);
    let tls_within = within_sigma(row.tls.p95, baseline.tls.mean_p95, baseline.tls.stddev_p95, 1.0);
    ttfb_exceeds && tcp_within && tls_within
}

fn throughput_bound(row: &AggregateRow, baseline: &Baseline, config: &DiagConfig) -> bool {
    let dropped = at_most_factor(row.throughput.p50, baseline.throughput.mean_p50, config.throughput_drop_factor);
    let latencies_within = [MetricKind::Dns, MetricKind::Tcp, MetricKind::Tls, MetricKind::Ttfb]
        .into_iter()
        .all(|metric| {
            let current = row.percentile_set(metric).p95;
            let b = baseline.metric(metric);
            within_sigma(current, b.mean_p95, b.stddev_p95, 1.0)
        });
    dropped && latencies_within
}

/// Apply the ordered rule table and return the matching label.
pub fn diagnose(row: &AggregateRow, baseline: &Baseline, config: &DiagConfig) -> &'static str {
    if dns_bound(row, baseline, config) {
        LABEL_DNS_BOUND
    } else if handshake_bound(row, baseline, config) {
        LABEL_HANDSHAKE_BOUND
    } else if server_bound(row, baseline, config) {
        LABEL_SERVER_BOUND
    } else if throughput_bound(row, baseline, config) {
        LABEL_THROUGHPUT_BOUND
    } else {
        LABEL_HEALTHY
    }
}
