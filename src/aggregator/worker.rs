use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::AggregatorState;
use crate::bus::Envelope;
use crate::error::AggregatorError;
use crate::store::{ApplyOutcome, EventEffect};
use crate::telemetry::WindowKey;

const CONSUMER_NAME: &str = "aggregator";
const IDLE_POLL_DELAY: Duration = Duration::from_millis(100);

/// Run the consume loop until `shutdown` is observed. Intended to be spawned
/// once per worker task; `state.config.worker_concurrency` tasks run this
/// concurrently, all sharing the same latches and sample buffers.
pub async fn run_worker_loop(state: AggregatorState, shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut shutdown = shutdown;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let envelope = match state.bus.fetch_next(CONSUMER_NAME).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tokio::select! {
                    _ = sleep(IDLE_POLL_DELAY) => continue,
                    _ = shutdown.changed() => break,
                }
            }
            Err(e) => {
                warn!(error = %e, "bus fetch failed");
                sleep(IDLE_POLL_DELAY).await;
                continue;
            }
        };

        process_one(&state, envelope).await;
    }
}

async fn process_one(state: &AggregatorState, envelope: Envelope) {
    let now_ms = state.clock.now_ms();
    let event = &envelope.event;
    let key = WindowKey::for_event(&event.client_id, &event.target, event.ts_ms);

    if is_late(&key, now_ms, state.config.lateness_ms) {
        debug!(client_id = %event.client_id, target = %event.target, window_start_ms = key.window_start_ms, "dropping late event");
        state
            .metrics
            .aggregator_events_total
            .with_label_values(&["late"])
            .inc();
        let _ = state.bus.ack(&envelope.delivery_id).await;
        return;
    }

    match apply_and_buffer(state, &key, &envelope).await {
        Ok(ApplyOutcome::Applied) => {
            state
                .metrics
                .aggregator_events_total
                .with_label_values(&["success"])
                .inc();
            state
                .metrics
                .dedup_hits_total
                .with_label_values(&["applied"])
                .inc();
            state
                .metrics
                .processing_delay_ms
                .with_label_values(&["aggregator"])
                .observe((now_ms - event.ts_ms).max(0) as f64);
            let _ = state.bus.ack(&envelope.delivery_id).await;
        }
        Ok(ApplyOutcome::Duplicate) => {
            state
                .metrics
                .aggregator_events_total
                .with_label_values(&["duplicate"])
                .inc();
            state
                .metrics
                .dedup_hits_total
                .with_label_values(&["duplicate"])
                .inc();
            let _ = state.bus.ack(&envelope.delivery_id).await;
        }
        Err(e) => {
            warn!(error = %e, delivery_id = %envelope.delivery_id, "transient failure processing event, nacking for redelivery");
            state
                .metrics
                .aggregator_events_total
                .with_label_values(&["decode_error"])
                .inc();
            if envelope.delivery_count >= 5 {
                state
                    .metrics
                    .aggregator_events_total
                    .with_label_values(&["dlq"])
                    .inc();
                state
                    .metrics
                    .dlq_messages_total
                    .with_label_values(&["max_deliver_exceeded"])
                    .inc();
                let _ = state.bus.dead_letter(&envelope, &e.to_string()).await;
            } else {
                let _ = state.bus.nack(&envelope.delivery_id).await;
            }
        }
    }
}

fn is_late(key: &WindowKey, now_ms: i64, lateness_ms: i64) -> bool {
    now_ms >= key.window_end_ms() + lateness_ms
}

async fn apply_and_buffer(
    state: &AggregatorState,
    key: &WindowKey,
    envelope: &Envelope,
) -> Result<ApplyOutcome, AggregatorError> {
    let event = &envelope.event;
    let _guard = state.latches.acquire(key).await;

    let effect = EventEffect {
        event_id: event.event_id,
        client_id: event.client_id.clone(),
        ts_ms: event.ts_ms,
        is_error: event.error_stage.is_some(),
        error_stage: event.error_stage,
    };

    let outcome = state
        .store
        .apply_event(key, &effect, state.clock.now_ms())
        .await?;

    if outcome == ApplyOutcome::Applied && event.error_stage.is_none() {
        let cap = state.config.max_samples_per_window_per_metric;
        let entry = state
            .buffers
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(super::WindowSampleBuffers::new(cap)));
        let mut buffers = entry.lock().await;
        let mut rng = rand::thread_rng();
        buffers.record(&event.timings, event.throughput_kbps, &mut rng);
    }

    Ok(outcome)
}
