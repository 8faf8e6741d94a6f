//! Dispatcher counters and per-tool latency.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::Serialize;
use toolloop_protocol::ToolOutcome;

#[derive(Default)]
pub struct DispatcherMetrics {
    calls: AtomicU64,
    successes: AtomicU64,
    retryable_errors: AtomicU64,
    fatal_errors: AtomicU64,
    contract_mismatches: AtomicU64,
    transport_failures: AtomicU64,
    forced_refreshes: AtomicU64,
    background_refreshes: AtomicU64,
    in_flight: AtomicU64,

    latencies: DashMap<String, LatencyStats>,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call_start(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_end(&self, tool: &str, outcome: ToolOutcome, duration_ms: u64) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        let counter = match outcome {
            ToolOutcome::Success => &self.successes,
            ToolOutcome::RetryableError => &self.retryable_errors,
            ToolOutcome::FatalError => &self.fatal_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.latencies
            .entry(tool.to_string())
            .or_default()
            .record(duration_ms);
    }

    pub fn record_contract_mismatch(&self) {
        self.contract_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_refresh(&self) {
        self.forced_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_refresh(&self) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_latency(&self, tool: &str) -> Option<LatencySnapshot> {
        self.latencies.get(tool).map(|stats| stats.snapshot())
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            retryable_errors: self.retryable_errors.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            contract_mismatches: self.contract_mismatches.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            forced_refreshes: self.forced_refreshes.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            latencies: self
                .latencies
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().snapshot()))
                .collect(),
        }
    }
}

pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }
}

impl LatencyStats {
    fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        LatencySnapshot {
            count,
            avg_ms: if count > 0 { total / count } else { 0 },
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of dispatcher activity, attached to response metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatcherSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub retryable_errors: u64,
    pub fatal_errors: u64,
    pub contract_mismatches: u64,
    pub transport_failures: u64,
    pub forced_refreshes: u64,
    pub background_refreshes: u64,
    pub in_flight: u64,
    pub latencies: BTreeMap<String, LatencySnapshot>,
}

impl DispatcherSnapshot {
    /// Percentage of completed calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        let completed = self.successes + self.retryable_errors + self.fatal_errors;
        if completed == 0 {
            100.0
        } else {
            (self.successes as f64 / completed as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counters() {
        let metrics = DispatcherMetrics::new();
        for outcome in [
            ToolOutcome::Success,
            ToolOutcome::Success,
            ToolOutcome::RetryableError,
            ToolOutcome::FatalError,
        ] {
            metrics.record_call_start();
            metrics.record_call_end("search", outcome, 10);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.calls, 4);
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.retryable_errors, 1);
        assert_eq!(snapshot.fatal_errors, 1);
        assert_eq!(snapshot.in_flight, 0);
        assert!((snapshot.success_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = DispatcherMetrics::new();
        for ms in [5, 15, 40] {
            metrics.record_call_start();
            metrics.record_call_end("fetch", ToolOutcome::Success, ms);
        }

        let latency = metrics.tool_latency("fetch").unwrap();
        assert_eq!(latency.count, 3);
        assert_eq!(latency.avg_ms, 20);
        assert_eq!(latency.min_ms, 5);
        assert_eq!(latency.max_ms, 40);
        assert!(metrics.tool_latency("missing").is_none());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = DispatcherMetrics::new().snapshot();
        assert_eq!(snapshot, DispatcherSnapshot::default());
        assert!((snapshot.success_rate() - 100.0).abs() < f64::EPSILON);
    }
}
