//! Stateful windowed aggregator (SPEC_FULL.md §2 C4, §4.3). Consumes from
//! the bus, deduplicates and window-assigns, buffers samples for streaming
//! percentiles, and flushes aggregates on a fixed cadence.

mod flush;
mod latch;
mod sample_buffer;
mod worker;

pub use flush::run_flush_loop;
pub use latch::KeyLatches;
pub use sample_buffer::{MetricReservoir, WindowSampleBuffers};
pub use worker::run_worker_loop;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::config::AggConfig;
use crate::metrics::Metrics;
use crate::store::AggregateStore;
use crate::telemetry::WindowKey;

/// Shared state between the consume-loop worker tasks and the flush loop.
/// Cloning is cheap: everything inside is an `Arc`.
#[derive(Clone)]
pub struct AggregatorState {
    pub bus: Arc<dyn EventBus>,
    pub store: Arc<dyn AggregateStore>,
    pub clock: SharedClock,
    pub config: AggConfig,
    pub latches: Arc<KeyLatches>,
    pub buffers: Arc<DashMap<WindowKey, Mutex<WindowSampleBuffers>>>,
    pub metrics: Arc<Metrics>,
}

impl AggregatorState {
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<dyn AggregateStore>,
        clock: SharedClock,
        config: AggConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            bus,
            store,
            clock,
            config,
            latches: Arc::new(KeyLatches::new()),
            buffers: Arc::new(DashMap::new()),
            metrics,
        }
    }
}
