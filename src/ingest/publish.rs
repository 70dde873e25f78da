use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::warn;

use crate::bus::EventBus;
use crate::error::IngestError;
use crate::telemetry::TelemetryEvent;

const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Publish with at most one synchronous retry inside a single overall
/// deadline (SPEC_FULL.md §4.1 "Publish"). Ingest never blocks indefinitely
/// on the bus: if the deadline elapses before either attempt lands, the
/// caller gets a 500 and the probe is expected to retry the whole request.
pub async fn publish_with_retry(
    bus: &dyn EventBus,
    event: &TelemetryEvent,
    deadline_ms: u64,
) -> Result<(), IngestError> {
    let deadline_at = Instant::now() + Duration::from_millis(deadline_ms);
    let deadline_exceeded = || IngestError::PublishFailed(crate::bus::BusError::Publish("deadline exceeded".into()));

    match timeout_at(deadline_at, bus.publish(event)).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => warn!(error = %e, event_id = %event.event_id, "first publish attempt failed, retrying once"),
        Err(_) => return Err(deadline_exceeded()),
    }

    if timeout_at(deadline_at, sleep(RETRY_BACKOFF)).await.is_err() {
        return Err(deadline_exceeded());
    }

    match timeout_at(deadline_at, bus.publish(event)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(IngestError::PublishFailed(e)),
        Err(_) => Err(deadline_exceeded()),
    }
}
