//! Bounded streaming sample retention and percentile computation
//! (SPEC_FULL.md §4.3 "Downsampling rationale", §3.1 I3).
//!
//! Below `max_samples_per_window_per_metric` every sample is retained, so
//! percentiles are exact. Above the cap, classic reservoir sampling (Algorithm
//! R) keeps a uniform random subset, trading exactness for an unbiased
//! estimator at a bounded memory cost.

use rand::Rng;

use crate::store::MetricKind;
use crate::telemetry::Timings;

#[derive(Debug, Clone)]
pub struct MetricReservoir {
    cap: usize,
    seen: u64,
    samples: Vec<f64>,
}

impl MetricReservoir {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            seen: 0,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, value: f64, rng: &mut impl Rng) {
        self.seen += 1;
        if self.samples.len() < self.cap {
            self.samples.push(value);
            return;
        }
        // Algorithm R: replace a uniformly random existing slot with
        // probability cap / seen so every observed sample is equally likely
        // to survive.
        let j = rng.gen_range(0..self.seen);
        if (j as usize) < self.cap {
            self.samples[j as usize] = value;
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile: `p(x)` is the value at 1-indexed rank
    /// `ceil(x/100 * n)`. Returns `None` for an empty buffer.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("samples must not be NaN"));
        let n = sorted.len();
        let rank = ((pct / 100.0) * n as f64).ceil() as usize;
        let rank = rank.clamp(1, n);
        Some(sorted[rank - 1])
    }

    pub fn p50(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    pub fn p95(&self) -> Option<f64> {
        self.percentile(95.0)
    }
}

/// The five metric reservoirs for one window, all sharing the same cap.
#[derive(Debug, Clone)]
pub struct WindowSampleBuffers {
    cap: usize,
    dns: MetricReservoir,
    tcp: MetricReservoir,
    tls: MetricReservoir,
    ttfb: MetricReservoir,
    throughput: MetricReservoir,
}

impl WindowSampleBuffers {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            dns: MetricReservoir::new(cap),
            tcp: MetricReservoir::new(cap),
            tls: MetricReservoir::new(cap),
            ttfb: MetricReservoir::new(cap),
            throughput: MetricReservoir::new(cap),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn record(&mut self, timings: &Timings, throughput_kbps: Option<f64>, rng: &mut impl Rng) {
        if let Some(v) = timings.dns_ms {
            self.dns.push(v, rng);
        }
        if let Some(v) = timings.tcp_ms {
            self.tcp.push(v, rng);
        }
        if let Some(v) = timings.tls_ms {
            self.tls.push(v, rng);
        }
        if let Some(v) = timings.ttfb_ms {
            self.ttfb.push(v, rng);
        }
        if let Some(v) = throughput_kbps {
            self.throughput.push(v, rng);
        }
    }

    pub fn reservoir(&self, metric: MetricKind) -> &MetricReservoir {
        match metric {
            MetricKind::Dns => &self.dns,
            MetricKind::Tcp => &self.tcp,
            MetricKind::Tls => &self.tls,
            MetricKind::Ttfb => &self.ttfb,
            MetricKind::Throughput => &self.throughput,
        }
    }
}
