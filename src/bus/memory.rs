use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::{BusError, Envelope, EventBus};
use crate::telemetry::TelemetryEvent;

/// In-memory stand-in for the production bus, used by unit and integration
/// tests. Keeps the same at-least-once contract: `nack` requeues instead of
/// dropping, and `delivery_count` increments on every redelivery.
#[derive(Default)]
pub struct InMemoryBus {
    queue: Mutex<VecDeque<Envelope>>,
    inflight: Mutex<HashMap<String, Envelope>>,
    dlq: Mutex<Vec<(Envelope, String)>>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_delivery_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("mem-{n}")
    }

    pub async fn dlq_len(&self) -> usize {
        self.dlq.lock().await.len()
    }

    pub async fn drain_dlq(&self) -> Vec<(Envelope, String)> {
        std::mem::take(&mut *self.dlq.lock().await)
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, event: &TelemetryEvent) -> Result<(), BusError> {
        let envelope = Envelope {
            event: event.clone(),
            delivery_id: self.next_delivery_id(),
            delivery_count: 0,
        };
        self.queue.lock().await.push_back(envelope);
        Ok(())
    }

    async fn fetch_next(&self, _consumer: &str) -> Result<Option<Envelope>, BusError> {
        let mut queue = self.queue.lock().await;
        let Some(mut envelope) = queue.pop_front() else {
            return Ok(None);
        };
        envelope.delivery_count += 1;
        self.inflight
            .lock()
            .await
            .insert(envelope.delivery_id.clone(), envelope.clone());
        Ok(Some(envelope))
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), BusError> {
        self.inflight
            .lock()
            .await
            .remove(delivery_id)
            .map(|_| ())
            .ok_or(BusError::UnknownDelivery)
    }

    async fn nack(&self, delivery_id: &str) -> Result<(), BusError> {
        let envelope = self
            .inflight
            .lock()
            .await
            .remove(delivery_id)
            .ok_or(BusError::UnknownDelivery)?;
        self.queue.lock().await.push_front(envelope);
        Ok(())
    }

    async fn dead_letter(&self, envelope: &Envelope, reason: &str) -> Result<(), BusError> {
        self.inflight.lock().await.remove(&envelope.delivery_id);
        self.dlq
            .lock()
            .await
            .push((envelope.clone(), reason.to_string()));
        Ok(())
    }
}
