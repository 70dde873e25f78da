//! Prometheus metrics registry (SPEC_FULL.md §4.9, §6). Registered once at
//! startup and shared via `Arc` across the ingest server, aggregator
//! workers, and diagnoser task.

use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub ingest_requests_total: IntCounterVec,
    pub rate_limit_drops_total: IntCounter,
    pub publish_failures_total: IntCounterVec,
    pub aggregator_events_total: IntCounterVec,
    pub window_flushes_total: IntCounterVec,
    pub queue_consumer_lag: IntGauge,
    pub dedup_hits_total: IntCounterVec,
    pub processing_delay_ms: HistogramVec,
    pub dlq_messages_total: IntCounterVec,
    pub diagnoses_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ingest_requests_total = IntCounterVec::new(
            prometheus::Opts::new("ingest_requests_total", "Ingest HTTP requests by status class"),
            &["status"],
        )
        .expect("metric definition is valid");

        let rate_limit_drops_total = IntCounter::new(
            "rate_limit_drops_total",
            "Requests rejected by the per-client rate limiter",
        )
        .expect("metric definition is valid");

        let publish_failures_total = IntCounterVec::new(
            prometheus::Opts::new("publish_failures_total", "Ingest publishes to the bus that failed"),
            &["reason"],
        )
        .expect("metric definition is valid");

        let aggregator_events_total = IntCounterVec::new(
            prometheus::Opts::new(
                "aggregator_events_total",
                "Events processed by the aggregator, by outcome {success, duplicate, late, decode_error, dlq}",
            ),
            &["outcome"],
        )
        .expect("metric definition is valid");

        let window_flushes_total = IntCounterVec::new(
            prometheus::Opts::new("window_flushes_total", "Percentile flush passes over a window"),
            &["metric"],
        )
        .expect("metric definition is valid");

        let queue_consumer_lag = IntGauge::new(
            "queue_consumer_lag",
            "Approximate number of undelivered or unacked messages pending for the aggregator consumer",
        )
        .expect("metric definition is valid");

        let dedup_hits_total = IntCounterVec::new(
            prometheus::Opts::new("dedup_hits_total", "Dedup outcomes by result {applied, duplicate}"),
            &["result"],
        )
        .expect("metric definition is valid");

        let processing_delay_ms = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "processing_delay_ms",
                "End-to-end delay from event ts_ms to aggregator commit, in milliseconds",
            )
            .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 5_000.0, 30_000.0, 120_000.0]),
            &["component"],
        )
        .expect("metric definition is valid");

        let dlq_messages_total = IntCounterVec::new(
            prometheus::Opts::new("dlq_messages_total", "Messages routed to the dead-letter subject"),
            &["reason"],
        )
        .expect("metric definition is valid");

        let diagnoses_total = IntCounterVec::new(
            prometheus::Opts::new("diagnoses_total", "Diagnosis verdicts emitted, by label"),
            &["label"],
        )
        .expect("metric definition is valid");

        for collector in [
            Box::new(ingest_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(rate_limit_drops_total.clone()),
            Box::new(publish_failures_total.clone()),
            Box::new(aggregator_events_total.clone()),
            Box::new(window_flushes_total.clone()),
            Box::new(queue_consumer_lag.clone()),
            Box::new(dedup_hits_total.clone()),
            Box::new(processing_delay_ms.clone()),
            Box::new(dlq_messages_total.clone()),
            Box::new(diagnoses_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric name collision registering startup collectors");
        }

        Self {
            registry,
            ingest_requests_total,
            rate_limit_drops_total,
            publish_failures_total,
            aggregator_events_total,
            window_flushes_total,
            queue_consumer_lag,
            dedup_hits_total,
            processing_delay_ms,
            dlq_messages_total,
            diagnoses_total,
        }
    }

    /// Render the registry in Prometheus text exposition format for
    /// `GET /metrics`.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .expect("metric families always encode");
        String::from_utf8(buf).expect("prometheus text encoding is always valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
