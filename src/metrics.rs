//! In-process metrics: named counters and latency timers.
//!
//! Metrics are optional. A disabled [`MetricsRuntime`] still hands out
//! counters and timers so call sites never branch on it, but those
//! instruments record nothing and the snapshot stays empty.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

/// Payloads returned by the source
pub const PAYLOADS_FETCHED: &str = "payloads_fetched";
/// Payloads written to the primary sink
pub const PAYLOADS_SUCCEEDED: &str = "payloads_succeeded";
/// Payloads routed to the DLQ
pub const PAYLOADS_DEAD_LETTERED: &str = "payloads_dead_lettered";
/// DLQ writes that failed (payload lost)
pub const DLQ_FAILURES: &str = "dlq_failures";
/// Source fetch calls that returned an error
pub const FETCH_ERRORS: &str = "fetch_errors";
/// Time spent in the transformer
pub const TRANSFORM_LATENCY: &str = "transform.latency";
/// Time spent writing to the primary sink
pub const SINK_LATENCY: &str = "sink.latency";

/// A monotonically increasing counter
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
    enabled: bool,
}

impl Counter {
    fn new(enabled: bool) -> Self {
        Self {
            value: AtomicU64::new(0),
            enabled,
        }
    }

    /// Add one
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        if self.enabled {
            self.value.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Latency recorder (count, total and max)
#[derive(Debug)]
pub struct Timer {
    count: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
    enabled: bool,
}

impl Timer {
    fn new(enabled: bool) -> Self {
        Self {
            count: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
            enabled,
        }
    }

    /// Record one observation
    pub fn record(&self, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Record the time elapsed since `start`
    pub fn record_since(&self, start: Instant) {
        self.record(start.elapsed());
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> TimerSnapshot {
        let count = self.count();
        let total = self.total_micros.load(Ordering::Relaxed);
        TimerSnapshot {
            count,
            mean_micros: if count == 0 { 0 } else { total / count },
            max_micros: self.max_micros.load(Ordering::Relaxed),
        }
    }
}

/// Registry of named instruments
#[derive(Debug)]
pub struct MetricsRuntime {
    enabled: bool,
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    timers: RwLock<BTreeMap<String, Arc<Timer>>>,
}

impl MetricsRuntime {
    /// Create a runtime that records observations
    pub fn enabled() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    /// Create a runtime whose instruments record nothing
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self::new(false))
    }

    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            counters: RwLock::new(BTreeMap::new()),
            timers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Whether instruments record observations
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get or register a counter
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if !self.enabled {
            return Arc::new(Counter::new(false));
        }
        if let Some(counter) = self.counters.read().get(name) {
            return Arc::clone(counter);
        }
        Arc::clone(
            self.counters
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::new(true))),
        )
    }

    /// Get or register a timer
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        if !self.enabled {
            return Arc::new(Timer::new(false));
        }
        if let Some(timer) = self.timers.read().get(name) {
            return Arc::clone(timer);
        }
        Arc::clone(
            self.timers
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Timer::new(true))),
        )
    }

    /// Point-in-time view of every registered instrument
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enabled: self.enabled,
            counters: self
                .counters
                .read()
                .iter()
                .map(|(name, c)| (name.clone(), c.get()))
                .collect(),
            timers: self
                .timers
                .read()
                .iter()
                .map(|(name, t)| (name.clone(), t.snapshot()))
                .collect(),
        }
    }
}

/// Serializable metrics view
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub enabled: bool,
    pub counters: BTreeMap<String, u64>,
    pub timers: BTreeMap<String, TimerSnapshot>,
}

impl MetricsSnapshot {
    /// Counter value, zero if never registered
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimerSnapshot {
    pub count: u64,
    pub mean_micros: u64,
    pub max_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_by_name() {
        let metrics = MetricsRuntime::enabled();
        metrics.counter(PAYLOADS_FETCHED).increment();
        metrics.counter(PAYLOADS_FETCHED).add(2);

        assert_eq!(metrics.snapshot().counter(PAYLOADS_FETCHED), 3);
        assert_eq!(metrics.snapshot().counter(FETCH_ERRORS), 0);
    }

    #[test]
    fn test_timer_aggregates() {
        let metrics = MetricsRuntime::enabled();
        let timer = metrics.timer("sink.latency");
        timer.record(Duration::from_micros(100));
        timer.record(Duration::from_micros(300));

        let snapshot = metrics.snapshot();
        let latency = snapshot.timers["sink.latency"];
        assert_eq!(latency.count, 2);
        assert_eq!(latency.mean_micros, 200);
        assert_eq!(latency.max_micros, 300);
    }

    #[test]
    fn test_disabled_runtime_records_nothing() {
        let metrics = MetricsRuntime::disabled();
        let counter = metrics.counter(PAYLOADS_SUCCEEDED);
        counter.increment();
        metrics.timer("transform.latency").record(Duration::from_millis(5));

        assert_eq!(counter.get(), 0);
        let snapshot = metrics.snapshot();
        assert!(!snapshot.enabled);
        assert!(snapshot.counters.is_empty());
        assert!(snapshot.timers.is_empty());
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = MetricsRuntime::enabled();
        metrics.counter(DLQ_FAILURES).increment();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["counters"][DLQ_FAILURES], 1);
    }
}
