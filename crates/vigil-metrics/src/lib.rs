//! vigil-metrics: in-memory health metrics for monitored services.
//!
//! Tracks per-service probe counters (totals, successes, failures, uptime,
//! latest response time) for the lifetime of the process, and renders them
//! either as Prometheus text exposition or as structured records.
//!
//! # Architecture
//!
//! ```text
//! MetricsStore
//!   ├── record_check() ← called by the health poller after every probe
//!   ├── get_metrics_json() / get_service_status() → ServiceMetrics records
//!   └── get_prometheus_metrics() → text/plain for a /metrics endpoint
//!
//! Prometheus exposition
//!   └── render_prometheus()
//! ```
//!
//! Nothing here is persisted: a restart starts every counter from zero.

pub mod collector;
pub mod prometheus;

pub use collector::{MetricsStore, ServiceMetrics};
pub use prometheus::render_prometheus;
