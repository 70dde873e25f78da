//! Typed error taxonomy for the telemetry pipeline.
//!
//! Each component exposes its own `thiserror`-derived enum so call sites can
//! match on what actually went wrong instead of stringly-typed errors. The
//! mapping from these variants onto HTTP status codes / ack-vs-nack behavior
//! lives at the component boundary (see `ingest::server` and
//! `aggregator::worker`), not here.

use thiserror::Error;

/// Failures surfaced while validating or routing an inbound `TelemetryEvent`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("body exceeds configured maximum of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("rate limit exceeded for client_id={client_id}, retry after {retry_after_ms}ms")]
    RateLimited { client_id: String, retry_after_ms: u64 },

    #[error("publish to event bus failed: {0}")]
    PublishFailed(#[from] crate::bus::BusError),
}

/// Failures surfaced while processing a single bus message in the aggregator.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("failed to decode event payload: {0}")]
    Decode(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] crate::bus::BusError),
}

/// Failures surfaced while computing or writing a diagnosis label.
#[derive(Debug, Error)]
pub enum DiagnoserError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Top-level error used by the CLI entry points to report a non-zero exit.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Aggregator(#[from] AggregatorError),

    #[error(transparent)]
    Diagnoser(#[from] DiagnoserError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Bus(#[from] crate::bus::BusError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
