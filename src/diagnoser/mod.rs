//! Rule-based diagnoser (SPEC_FULL.md §2 C5, §4.5). Runs on a fixed cadence,
//! evaluating every closed-but-undiagnosed window against a rolling
//! baseline for its `(client_id, target)` key.

mod baseline;
mod rules;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::DiagConfig;
use crate::metrics::Metrics;
use crate::store::AggregateStore;

pub use rules::{
    LABEL_DNS_BOUND, LABEL_HANDSHAKE_BOUND, LABEL_HEALTHY, LABEL_SERVER_BOUND, LABEL_THROUGHPUT_BOUND,
};

pub struct DiagnoserState {
    pub store: Arc<dyn AggregateStore>,
    pub clock: SharedClock,
    pub config: DiagConfig,
    /// `agg.lateness_ms`: a window only becomes eligible for diagnosis once
    /// it has fully closed, which is owned by the aggregator's config but
    /// needed here too to find the boundary.
    pub lateness_ms: i64,
    pub metrics: Arc<Metrics>,
}

pub async fn run_diagnoser_loop(state: DiagnoserState, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.cadence_s));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = diagnose_pass(&state).await {
            warn!(error = %e, "diagnoser pass failed");
        }
    }
}

async fn diagnose_pass(state: &DiagnoserState) -> Result<(), crate::error::DiagnoserError> {
    let now_ms = state.clock.now_ms();
    let pending = state
        .store
        .list_undiagnosed_closed(now_ms, state.lateness_ms)
        .await?;

    debug!(count = pending.len(), "diagnoser pass starting");

    for row in pending {
        let history = state
            .store
            .list_recent_diagnosed(
                &row.key.client_id,
                &row.key.target,
                row.key.window_start_ms,
                state.config.baseline_windows,
            )
            .await?;

        if history.len() < state.config.baseline_windows {
            debug!(?row.key, history_len = history.len(), "insufficient baseline history, skipping");
            continue;
        }

        let baseline = baseline::compute_baseline(&history);
        let label = rules::diagnose(&row, &baseline, &state.config);

        state.store.set_diagnosis(&row.key, label, now_ms).await?;
        state.metrics.diagnoses_total.with_label_values(&[label]).inc();
        info!(?row.key, label, "window diagnosed");
    }

    Ok(())
}
