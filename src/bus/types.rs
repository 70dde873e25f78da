use crate::telemetry::TelemetryEvent;
use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connect(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("ack failed: {0}")]
    Ack(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("delivery handle unknown or already acked")]
    UnknownDelivery,
}

/// A message taken off the bus, carrying enough to ack/nack it and to know
/// how many times it has already been (re)delivered so at-least-once
/// delivery can be bounded by `bus.max_deliver` before routing to the DLQ.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: TelemetryEvent,
    pub delivery_id: String,
    pub delivery_count: u32,
}

/// Durable, at-least-once event transport. Implementations must redeliver an
/// unacked message after `ack_wait_s` and must preserve `delivery_count`
/// across redeliveries so callers can detect poison messages.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &TelemetryEvent) -> Result<(), BusError>;

    /// Pull the next undelivered (or redelivered) message for `consumer`.
    /// Returns `Ok(None)` if nothing is available right now; callers should
    /// poll or await a notification rather than treat this as an error.
    async fn fetch_next(&self, consumer: &str) -> Result<Option<Envelope>, BusError>;

    async fn ack(&self, delivery_id: &str) -> Result<(), BusError>;

    /// Negative-acknowledge a message, making it eligible for immediate
    /// redelivery (used when processing fails transiently).
    async fn nack(&self, delivery_id: &str) -> Result<(), BusError>;

    /// Route a message that has exhausted `max_deliver` to the dead-letter
    /// subject instead of redelivering it forever.
    async fn dead_letter(&self, envelope: &Envelope, reason: &str) -> Result<(), BusError>;
}
