//! vigil-health: periodic health polling for registered services.
//!
//! Probes every registered service concurrently on a fixed interval,
//! persists the resulting status, raises a transition event whenever a
//! service flips between active and inactive, and folds every outcome into
//! the in-memory [`MetricsStore`](vigil_metrics::MetricsStore).
//!
//! # Architecture
//!
//! ```text
//! HealthPoller
//!   ├── initialize() → immediate cycle + background interval task
//!   ├── perform_health_checks()
//!   │   ├── ServiceStore::list_services()        (one read)
//!   │   └── check_service_health() per service    (concurrent)
//!   │       ├── HealthProber::probe() → ProbeOutcome (10s timeout)
//!   │       ├── ServiceStore::update_service_health()  (errors logged)
//!   │       ├── TransitionEvent → mpsc queue      (only on change)
//!   │       └── MetricsStore::record_check()
//!   └── stop() → cancels future cycles, in-flight probes finish
//! ```
//!
//! A single slow or dead service only costs its own probe timeout; sibling
//! probes in the same cycle are unaffected.

pub mod checker;
pub mod monitor;

pub use checker::{HealthCheckResult, HealthProber, HealthStatus, ProbeError, ProbeOutcome};
pub use monitor::{HealthPoller, PollerConfig};
