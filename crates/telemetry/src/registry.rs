//! Thread-safe registry of named counters and gauges.

use chrono::{DateTime, Utc};
use parley_core::MetricsSink;
use parley_core::metrics::{ACTIVE_SOCKETS, LLM_FAILURES_TOTAL, LLM_REQUESTS_TOTAL, REQUESTS_TOTAL};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of every metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub metrics: BTreeMap<String, u64>,
}

/// The fixed set of metrics Parley reports.
///
/// Names outside the set are ignored, so a misspelt metric never grows the
/// map. Each slot is a single atomic; counters and gauges share storage and
/// differ only in which of `increment` / `set` callers use.
pub struct MetricsRegistry {
    started_at: DateTime<Utc>,
    slots: [(&'static str, AtomicU64); 4],
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            slots: [
                (REQUESTS_TOTAL, AtomicU64::new(0)),
                (LLM_REQUESTS_TOTAL, AtomicU64::new(0)),
                (LLM_FAILURES_TOTAL, AtomicU64::new(0)),
                (ACTIVE_SOCKETS, AtomicU64::new(0)),
            ],
        }
    }

    fn slot(&self, name: &str) -> Option<&AtomicU64> {
        self.slots
            .iter()
            .find(|(slot_name, _)| *slot_name == name)
            .map(|(_, value)| value)
    }

    /// Current value, or `None` for an unknown name.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.slot(name).map(|v| v.load(Ordering::Relaxed))
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self
            .slots
            .iter()
            .map(|(name, value)| (name.to_string(), value.load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            started_at: self.started_at,
            uptime_secs: self.uptime_secs(),
            metrics,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for MetricsRegistry {
    fn increment(&self, name: &str) {
        match self.slot(name) {
            Some(value) => {
                value.fetch_add(1, Ordering::Relaxed);
            }
            None => tracing::debug!(metric = %name, "Ignoring unknown metric"),
        }
    }

    fn set(&self, name: &str, value: u64) {
        match self.slot(name) {
            Some(slot) => slot.store(value, Ordering::Relaxed),
            None => tracing::debug!(metric = %name, "Ignoring unknown metric"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_at_zero() {
        let registry = MetricsRegistry::new();
        let snap = registry.snapshot();
        assert_eq!(snap.metrics.len(), 4);
        assert!(snap.metrics.values().all(|v| *v == 0));
    }

    #[test]
    fn increment_and_set() {
        let registry = MetricsRegistry::new();
        registry.increment(REQUESTS_TOTAL);
        registry.increment(REQUESTS_TOTAL);
        registry.increment(LLM_FAILURES_TOTAL);
        registry.set(ACTIVE_SOCKETS, 2);
        registry.set(ACTIVE_SOCKETS, 1);

        assert_eq!(registry.get(REQUESTS_TOTAL), Some(2));
        assert_eq!(registry.get(LLM_FAILURES_TOTAL), Some(1));
        assert_eq!(registry.get(LLM_REQUESTS_TOTAL), Some(0));
        assert_eq!(registry.get(ACTIVE_SOCKETS), Some(1));
    }

    #[test]
    fn unknown_names_are_ignored() {
        let registry = MetricsRegistry::new();
        registry.increment("requests_totl");
        registry.set("bogus", 9);
        assert_eq!(registry.get("requests_totl"), None);
        assert_eq!(registry.snapshot().metrics.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    registry.increment(LLM_REQUESTS_TOTAL);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.get(LLM_REQUESTS_TOTAL), Some(2000));
    }

    #[test]
    fn snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment(REQUESTS_TOTAL);
        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["metrics"]["requests_total"], 1);
        assert!(json["uptime_secs"].is_u64());
    }
}
