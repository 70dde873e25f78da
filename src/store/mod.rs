//! Transactional store abstraction over the dedup set and windowed
//! aggregates (SPEC_FULL.md §2 C2, §4.4).

mod memory;
mod postgres;
mod types;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use types::{
    AggregateRow, AggregateStore, ApplyOutcome, ErrorStageCounts, EventEffect, MetricKind,
    PercentileSet, StoreError,
};
