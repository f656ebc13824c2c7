//! Metrics sink trait — fire-and-forget counters.

/// Counter: HTTP requests served.
pub const REQUESTS_TOTAL: &str = "requests_total";
/// Counter: backend generations started.
pub const LLM_REQUESTS_TOTAL: &str = "llm_requests_total";
/// Counter: backend generations that failed.
pub const LLM_FAILURES_TOTAL: &str = "llm_failures_total";
/// Gauge: currently connected sockets.
pub const ACTIVE_SOCKETS: &str = "active_sockets";

/// Where components report counters. Never fails, never blocks.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str);

    fn set(&self, name: &str, value: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str) {}

    fn set(&self, _name: &str, _value: u64) {}
}
