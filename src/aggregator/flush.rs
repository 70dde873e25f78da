use std::time::Duration;

use tracing::debug;

use super::AggregatorState;
use crate::store::{MetricKind, PercentileSet};
use crate::telemetry::WindowKey;

/// Runs on `agg.flush_interval_ms`, computing percentiles for every window
/// with buffered samples and persisting them (SPEC_FULL.md §4.3 "Flush of
/// percentiles"). Windows past their lateness bound are evicted from memory
/// after their final flush.
pub async fn run_flush_loop(state: AggregatorState, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(state.config.flush_interval_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        flush_once(&state).await;
    }
    // Final force-flush on shutdown so Closable windows aren't left with
    // stale percentiles after the process exits.
    flush_once(&state).await;
}

async fn flush_once(state: &AggregatorState) {
    let now_ms = state.clock.now_ms();
    let keys: Vec<WindowKey> = state.buffers.iter().map(|e| e.key().clone()).collect();

    for key in keys {
        // Only windows that have entered the closable state are flushed;
        // an in-progress (Open) window's percentiles would otherwise churn
        // every tick for no benefit.
        if now_ms < key.window_end_ms() + state.config.lateness_ms {
            continue;
        }

        let _guard = state.latches.acquire(&key).await;
        let Some(entry) = state.buffers.get(&key) else {
            continue;
        };
        let buffers = entry.lock().await;

        for metric in MetricKind::ALL {
            let reservoir = buffers.reservoir(metric);
            if reservoir.is_empty() {
                continue;
            }
            let set = PercentileSet {
                p50: reservoir.p50(),
                p95: reservoir.p95(),
            };
            if let Err(e) = state.store.upsert_percentiles(&key, metric, set, now_ms).await {
                tracing::warn!(error = %e, ?key, "percentile upsert failed, will retry next flush");
            } else {
                state
                    .metrics
                    .window_flushes_total
                    .with_label_values(&[metric_label(metric)])
                    .inc();
            }
        }
        drop(buffers);
        drop(entry);

        debug!(?key, "window closed, evicting sample buffer");
        state.buffers.remove(&key);
        state.latches.evict(&key);
    }
}

fn metric_label(metric: MetricKind) -> &'static str {
    match metric {
        MetricKind::Dns => "dns",
        MetricKind::Tcp => "tcp",
        MetricKind::Tls => "tls",
        MetricKind::Ttfb => "ttfb",
        MetricKind::Throughput => "throughput",
    }
}
