//! Wire schema and window-key types shared by ingest, the aggregator, and
//! the diagnoser.

pub mod event;
pub mod window;

pub use event::{ErrorStage, NetworkContext, TelemetryEvent, Timings, ValidationError};
pub use window::WindowKey;
