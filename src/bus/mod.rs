//! Durable event bus abstraction (SPEC_FULL.md §2 C1, §4.2). Mirrors the
//! capability-trait pattern used for health-check clients elsewhere in this
//! codebase: one async trait, a production backend, and an in-memory fake
//! for tests.

mod memory;
mod nats;
mod types;

pub use memory::InMemoryBus;
pub use nats::NatsBus;
pub use types::{BusError, Envelope, EventBus};
