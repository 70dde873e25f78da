//! Window keying and lifecycle (SPEC_FULL.md §3.1 WindowedAggregate, §4.6).

use serde::{Deserialize, Serialize};

pub const WINDOW_SIZE_MS: i64 = 60_000;

/// Identity of a 1-minute aggregate bucket: one per `(client_id, target)`
/// pair per window. `window_start_ms` is always a multiple of
/// [`WINDOW_SIZE_MS`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    pub client_id: String,
    pub target: String,
    pub window_start_ms: i64,
}

impl WindowKey {
    pub fn new(client_id: impl Into<String>, target: impl Into<String>, window_start_ms: i64) -> Self {
        Self {
            client_id: client_id.into(),
            target: target.into(),
            window_start_ms,
        }
    }

    /// Which window an event with the given `ts_ms` belongs to.
    pub fn for_event(client_id: &str, target: &str, ts_ms: i64) -> Self {
        Self::new(client_id, target, floor_to_window(ts_ms))
    }

    pub fn window_end_ms(&self) -> i64 {
        self.window_start_ms + WINDOW_SIZE_MS
    }
}

pub fn floor_to_window(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(WINDOW_SIZE_MS) * WINDOW_SIZE_MS
}

/// Lifecycle state of a window, per SPEC_FULL.md §4.6:
///
/// - `Open`: still accepting in-order events.
/// - `Closable`: wall-clock has passed `window_end_ms + lateness_ms`, but the
///   flush sweep has not yet run.
/// - `Closed`: percentiles computed and persisted; no further samples are
///   accepted (late arrivals bump a `late_events_dropped` counter instead).
/// - `Diagnosed`: the diagnoser has evaluated this window against the
///   baseline and recorded a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    Open,
    Closable,
    Closed,
    Diagnosed,
}

impl WindowState {
    /// Compute the lifecycle state of a window given the current time and
    /// the configured lateness allowance. Does not itself know whether a
    /// flush or diagnosis has actually run; callers combine this with store
    /// state to decide the next action.
    pub fn for_window(window_end_ms: i64, now_ms: i64) -> WindowState {
        if now_ms < window_end_ms {
            WindowState::Open
        } else {
            WindowState::Closable
        }
    }

    pub fn is_accepting_samples(self) -> bool {
        matches!(self, WindowState::Open | WindowState::Closable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_to_minute_boundary() {
        assert_eq!(floor_to_window(0), 0);
        assert_eq!(floor_to_window(59_999), 0);
        assert_eq!(floor_to_window(60_000), 60_000);
        assert_eq!(floor_to_window(125_001), 120_000);
    }

    #[test]
    fn window_end_is_one_minute_after_start() {
        let key = WindowKey::new("c1", "example.com", 60_000);
        assert_eq!(key.window_end_ms(), 120_000);
    }

    #[test]
    fn for_event_assigns_matching_window() {
        let key = WindowKey::for_event("c1", "example.com", 125_001);
        assert_eq!(key.window_start_ms, 120_000);
    }
}
