//! Process-wide counters and gauges for Parley.
//!
//! The gateway counts served requests and connected sockets, and each
//! assistant session counts backend calls and failures. Everything lands in
//! one [`MetricsRegistry`] that the `/api/v1/metrics` route snapshots.

pub mod registry;

pub use registry::{MetricsRegistry, MetricsSnapshot};
