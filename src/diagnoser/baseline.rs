//! Rolling baseline computation (SPEC_FULL.md §4.5 step 1): simple moving
//! average and sample standard deviation of each percentile metric over the
//! last `diag.baseline_windows` closed, previously-diagnosed windows.

use crate::store::{AggregateRow, MetricKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricBaseline {
    pub mean_p50: Option<f64>,
    pub mean_p95: Option<f64>,
    pub stddev_p95: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Baseline {
    pub dns: MetricBaseline,
    pub tcp: MetricBaseline,
    pub tls: MetricBaseline,
    pub ttfb: MetricBaseline,
    pub throughput: MetricBaseline,
}

impl Baseline {
    pub fn metric(&self, metric: MetricKind) -> MetricBaseline {
        match metric {
            MetricKind::Dns => self.dns,
            MetricKind::Tcp => self.tcp,
            MetricKind::Tls => self.tls,
            MetricKind::Ttfb => self.ttfb,
            MetricKind::Throughput => self.throughput,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n-1 denominator). `None` if fewer than two
/// observations, since a single sample has no defined spread.
fn sample_stddev(values: &[f64], mean_value: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

fn metric_baseline(rows: &[AggregateRow], metric: MetricKind) -> MetricBaseline {
    let p50s: Vec<f64> = rows.iter().filter_map(|r| r.percentile_set(metric).p50).collect();
    let p95s: Vec<f64> = rows.iter().filter_map(|r| r.percentile_set(metric).p95).collect();

    let mean_p50 = mean(&p50s);
    let mean_p95 = mean(&p95s);
    let stddev_p95 = mean_p95.and_then(|m| sample_stddev(&p95s, m));

    MetricBaseline {
        mean_p50,
        mean_p95,
        stddev_p95,
    }
}

/// `rows` must already be "the last `baseline_windows` closed, previously
/// diagnosed windows for this key" per the store query; this function does
/// not itself enforce the minimum-count gate (callers check `rows.len()`
/// against `diag.baseline_windows` before calling).
pub fn compute_baseline(rows: &[AggregateRow]) -> Baseline {
    Baseline {
        dns: metric_baseline(rows, MetricKind::Dns),
        tcp: metric_baseline(rows, MetricKind::Tcp),
        tls: metric_baseline(rows, MetricKind::Tls),
        ttfb: metric_baseline(rows, MetricKind::Ttfb),
        throughput: metric_baseline(rows, MetricKind::Throughput),
    }
}
