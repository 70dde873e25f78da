//! Per-`client_id` token bucket rate limiting (SPEC_FULL.md §4.1). Buckets
//! live in a concurrent map keyed by `client_id` and are created lazily on
//! first use; an idle-eviction sweep bounds memory for clients that stop
//! sending.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::clock::SharedClock;

const IDLE_EVICTION_MS: i64 = 5 * 60 * 1000;
const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Bucket {
    tokens: f64,
    last_refill_ms: i64,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    rps: f64,
    burst: u32,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            rps,
            burst,
        }
    }

    /// Admit or reject one request for `client_id` at `now_ms`. On
    /// rejection, returns the milliseconds until a token becomes available.
    pub fn check_and_consume(&self, client_id: &str, now_ms: i64) -> Result<(), u64> {
        let mut bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.burst as f64,
                last_refill_ms: now_ms,
            });

        let elapsed_ms = (now_ms - bucket.last_refill_ms).max(0) as f64;
        let refill = elapsed_ms / 1000.0 * self.rps;
        bucket.tokens = (bucket.tokens + refill).min(self.burst as f64);
        bucket.last_refill_ms = now_ms;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after_ms = (deficit / self.rps * 1000.0).ceil() as u64;
            Err(retry_after_ms)
        }
    }

    /// Drop buckets that are both idle (`now - last_refill > 5min`) and full
    /// (no in-flight debt), so a client that disappears doesn't leak memory.
    pub fn evict_idle(&self, now_ms: i64) {
        self.buckets.retain(|_, bucket| {
            let idle = now_ms - bucket.last_refill_ms > IDLE_EVICTION_MS;
            let elapsed_ms = (now_ms - bucket.last_refill_ms).max(0) as f64;
            let projected = (bucket.tokens + elapsed_ms / 1000.0 * self.rps).min(self.burst as f64);
            let full = projected >= self.burst as f64;
            !(idle && full)
        });
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Periodic sweep that keeps the rate limiter's bucket map bounded for
/// clients that stop sending, mirroring the retention/flush cadence-loop
/// shape used elsewhere in the pipeline.
pub async fn run_rate_limiter_eviction_loop(
    rate_limiter: Arc<RateLimiter>,
    clock: SharedClock,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(EVICTION_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        rate_limiter.evict_idle(clock.now_ms());
        debug!(buckets = rate_limiter.bucket_count(), "rate limiter idle sweep complete");
    }
}
