//! Per-key serialization (SPEC_FULL.md §5): counter upserts, sample-buffer
//! appends, and percentile flushes for the same `(client_id, target,
//! window_start_ts)` are serialized by an async mutex sharded over a
//! concurrent map, so different keys still progress in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::telemetry::WindowKey;

#[derive(Default)]
pub struct KeyLatches {
    locks: DashMap<WindowKey, Arc<Mutex<()>>>,
}

impl KeyLatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the latch for `key`, creating it on first use. The returned
    /// guard holds a clone of the `Arc`, so the lock stays alive even if
    /// another task removes this key's entry from the map concurrently.
    pub async fn acquire(&self, key: &WindowKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop latches for keys no longer in play. Safe to call periodically;
    /// a latch recreated after removal is equivalent to a fresh one since
    /// the guarded value carries no state.
    pub fn evict(&self, key: &WindowKey) {
        self.locks.remove(key);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
