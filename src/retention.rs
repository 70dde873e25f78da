//! Periodic retention sweep (SPEC_FULL.md §4.4 "Retention"). Deletes
//! `events_seen` rows older than `store.events_seen_retention_days` and
//! `agg_1m` rows older than `store.agg_retention_days` in one batched,
//! transactional pass.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::store::AggregateStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn run_retention_loop(
    store: Arc<dyn AggregateStore>,
    clock: SharedClock,
    config: StoreConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        sweep_once(store.as_ref(), clock.as_ref(), &config).await;
    }
}

async fn sweep_once(store: &dyn AggregateStore, clock: &dyn crate::clock::Clock, config: &StoreConfig) {
    let now_ms = clock.now_ms();
    let events_seen_before_ms = now_ms - config.events_seen_retention_days as i64 * 86_400_000;
    let agg_before_ms = now_ms - config.agg_retention_days as i64 * 86_400_000;

    match store.purge_retention(events_seen_before_ms, agg_before_ms).await {
        Ok((events_deleted, agg_deleted)) => {
            info!(events_deleted, agg_deleted, "retention sweep complete");
        }
        Err(e) => warn!(error = %e, "retention sweep failed"),
    }
}
