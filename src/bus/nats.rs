use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, stream::RetentionPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use super::types::{BusError, Envelope, EventBus};
use crate::config::BusConfig;
use crate::telemetry::TelemetryEvent;

/// JetStream-backed production bus. One durable pull consumer per process;
/// acking and nacking require the original `jetstream::Message`, so we keep
/// in-flight messages keyed by a synthetic delivery id derived from the
/// stream sequence.
pub struct NatsBus {
    context: jetstream::Context,
    subject: String,
    dlq_subject: String,
    consumer: PullConsumer,
    inflight: Mutex<HashMap<String, jetstream::Message>>,
}

impl NatsBus {
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let client = async_nats::connect(&config.nats_url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        let context = jetstream::new(client);

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: vec![config.subject.clone(), config.dlq_subject.clone()],
                retention: RetentionPolicy::WorkQueue,
                max_age: Duration::from_secs(config.stream_retention_days as u64 * 86_400),
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &config.consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject.clone(),
                    ack_wait: Duration::from_secs(config.ack_wait_s),
                    max_deliver: config.max_deliver as i64,
                    max_ack_pending: config.max_ack_pending as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;

        Ok(Self {
            context,
            subject: config.subject.clone(),
            dlq_subject: config.dlq_subject.clone(),
            consumer,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Publish a raw, undecodable payload straight to the dead-letter
    /// subject and ack the original delivery. Used when a message fails to
    /// decode before a `TelemetryEvent`/`Envelope` can be constructed.
    async fn dead_letter_raw(&self, delivery_id: &str, payload: &[u8], reason: &str) -> Result<(), BusError> {
        self.context
            .publish(self.dlq_subject.clone(), payload.to_vec().into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        tracing::warn!(delivery_id, reason, "routed undecodable message to dead-letter subject");

        if let Some(message) = self.inflight.lock().await.remove(delivery_id) {
            message
                .ack()
                .await
                .map_err(|e| BusError::Ack(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, event: &TelemetryEvent) -> Result<(), BusError> {
        let payload = serde_json::to_vec(event).map_err(|e| BusError::Publish(e.to_string()))?;
        self.context
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn fetch_next(&self, _consumer: &str) -> Result<Option<Envelope>, BusError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(Duration::from_millis(500))
            .messages()
            .await
            .map_err(|e| BusError::Fetch(e.to_string()))?;

        let Some(message) = batch.next().await else {
            return Ok(None);
        };
        let message = message.map_err(|e| BusError::Fetch(e.to_string()))?;

        let info = message
            .info()
            .map_err(|e| BusError::Fetch(e.to_string()))?;
        let delivery_id = format!("{}-{}", info.stream_sequence, info.delivery_sequence);
        let delivery_count = info.delivery_sequence as u32;

        // Stash the raw message before decoding: a malformed payload must
        // still be ack/nack/dead-letter-able by delivery id, not dropped.
        let payload = message.payload.clone();
        self.inflight
            .lock()
            .await
            .insert(delivery_id.clone(), message);

        let event: TelemetryEvent = match serde_json::from_slice(&payload) {
            Ok(event) => event,
            Err(e) => {
                self.dead_letter_raw(&delivery_id, &payload, &e.to_string()).await?;
                return Ok(None);
            }
        };

        Ok(Some(Envelope {
            event,
            delivery_id,
            delivery_count,
        }))
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), BusError> {
        let message = self
            .inflight
            .lock()
            .await
            .remove(delivery_id)
            .ok_or(BusError::UnknownDelivery)?;
        message.ack().await.map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn nack(&self, delivery_id: &str) -> Result<(), BusError> {
        let message = self
            .inflight
            .lock()
            .await
            .remove(delivery_id)
            .ok_or(BusError::UnknownDelivery)?;
        message
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn dead_letter(&self, envelope: &Envelope, reason: &str) -> Result<(), BusError> {
        let payload = serde_json::to_vec(&envelope.event).map_err(|e| BusError::Publish(e.to_string()))?;
        self.context
            .publish(self.dlq_subject.clone(), payload.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        tracing::warn!(delivery_id = %envelope.delivery_id, reason, "routed message to dead-letter subject");

        if let Some(message) = self.inflight.lock().await.remove(&envelope.delivery_id) {
            message
                .ack()
                .await
                .map_err(|e| BusError::Ack(e.to_string()))?;
        }
        Ok(())
    }
}
