//! Metrics store: tracks per-service health check counters.
//!
//! One [`ServiceMetrics`] record per slug, created lazily on the first
//! check. Updates are short read-modify-write sequences under a
//! `std::sync::RwLock` with no await point in between, so concurrent probes
//! from the same poll cycle never interleave half-applied updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::prometheus::render_prometheus;

/// In-memory health metrics for one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub slug: String,
    pub name: String,
    /// 1 if the latest probe was healthy, 0 otherwise.
    pub status: u8,
    /// Latest probe's response time. Overwritten on every check, not averaged.
    pub response_time_ms: u64,
    pub last_check: DateTime<Utc>,
    pub checks_total: u64,
    pub checks_successful: u64,
    pub checks_failed: u64,
    /// `checks_successful / checks_total * 100`.
    pub uptime_percent: f64,
}

impl ServiceMetrics {
    fn new(slug: &str, name: &str, checked_at: DateTime<Utc>) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            status: 0,
            response_time_ms: 0,
            last_check: checked_at,
            checks_total: 0,
            checks_successful: 0,
            checks_failed: 0,
            uptime_percent: 0.0,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == 1
    }
}

/// Process-lifetime metrics for every service the poller has checked.
#[derive(Debug, Default)]
pub struct MetricsStore {
    /// slug → metrics.
    services: RwLock<HashMap<String, ServiceMetrics>>,
    /// Whether the recurring poll timer is active.
    worker_running: AtomicBool,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one probe outcome into the metrics for `slug`.
    pub fn record_check(
        &self,
        slug: &str,
        name: &str,
        healthy: bool,
        response_time_ms: u64,
        checked_at: DateTime<Utc>,
    ) {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        let m = services
            .entry(slug.to_string())
            .or_insert_with(|| ServiceMetrics::new(slug, name, checked_at));

        m.name = name.to_string();
        m.checks_total += 1;
        if healthy {
            m.checks_successful += 1;
        } else {
            m.checks_failed += 1;
        }
        m.status = u8::from(healthy);
        m.response_time_ms = response_time_ms;
        m.last_check = checked_at;
        m.uptime_percent = m.checks_successful as f64 / m.checks_total as f64 * 100.0;

        debug!(
            %slug,
            healthy,
            response_time_ms,
            uptime = m.uptime_percent,
            "service metrics updated"
        );
    }

    pub fn set_worker_running(&self, running: bool) {
        self.worker_running.store(running, Ordering::SeqCst);
    }

    pub fn worker_running(&self) -> bool {
        self.worker_running.load(Ordering::SeqCst)
    }

    /// Snapshot of every tracked service, ordered by slug.
    pub fn get_metrics_json(&self) -> Vec<ServiceMetrics> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<ServiceMetrics> = services.values().cloned().collect();
        snapshot.sort_by(|a, b| a.slug.cmp(&b.slug));
        snapshot
    }

    /// Point lookup for one slug.
    pub fn get_service_status(&self, slug: &str) -> Option<ServiceMetrics> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services.get(slug).cloned()
    }

    /// Prometheus text exposition of the current snapshot.
    pub fn get_prometheus_metrics(&self) -> String {
        render_prometheus(&self.get_metrics_json(), self.worker_running())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn unknown_slug_is_none() {
        let store = MetricsStore::new();
        assert!(store.get_service_status("ghost").is_none());
        assert!(store.get_metrics_json().is_empty());
    }

    #[test]
    fn first_check_creates_record() {
        let store = MetricsStore::new();
        let now = Utc::now();
        store.record_check("tracking-api", "Tracking API", true, 42, now);

        let m = store.get_service_status("tracking-api").unwrap();
        assert_eq!(m.status, 1);
        assert_eq!(m.checks_total, 1);
        assert_eq!(m.checks_successful, 1);
        assert_eq!(m.checks_failed, 0);
        assert_eq!(m.response_time_ms, 42);
        assert_eq!(m.last_check, now);
        assert_eq!(m.uptime_percent, 100.0);
    }

    #[test]
    fn uptime_is_success_ratio() {
        let store = MetricsStore::new();
        store.record_check("a", "A", true, 10, Utc::now());
        store.record_check("a", "A", false, 20, Utc::now());
        store.record_check("a", "A", true, 30, Utc::now());
        store.record_check("a", "A", true, 40, Utc::now());

        let m = store.get_service_status("a").unwrap();
        assert_eq!(m.checks_total, 4);
        assert_eq!(m.checks_failed, 1);
        assert_eq!(m.uptime_percent, 75.0);
    }

    #[test]
    fn response_time_is_latest_not_average() {
        let store = MetricsStore::new();
        store.record_check("a", "A", true, 100, Utc::now());
        store.record_check("a", "A", false, 7, Utc::now());

        let m = store.get_service_status("a").unwrap();
        assert_eq!(m.response_time_ms, 7);
        assert_eq!(m.status, 0);
    }

    #[test]
    fn healthy_count_reflects_latest_status() {
        let store = MetricsStore::new();
        store.record_check("a", "A", true, 1, Utc::now());
        store.record_check("b", "B", true, 1, Utc::now());
        store.record_check("b", "B", false, 1, Utc::now());

        let snapshot = store.get_metrics_json();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.iter().filter(|m| m.is_up()).count(), 1);
        assert!(store.get_prometheus_metrics().contains("ecosystem_services_healthy 1\n"));
    }

    #[test]
    fn snapshot_is_sorted_by_slug() {
        let store = MetricsStore::new();
        store.record_check("zeta", "Z", true, 1, Utc::now());
        store.record_check("alpha", "A", true, 1, Utc::now());

        let slugs: Vec<_> = store.get_metrics_json().into_iter().map(|m| m.slug).collect();
        assert_eq!(slugs, vec!["alpha", "zeta"]);
    }

    #[test]
    fn json_uses_camel_case() {
        let store = MetricsStore::new();
        store.record_check("a", "A", true, 5, Utc::now());

        let json = serde_json::to_value(store.get_metrics_json()).unwrap();
        let first = &json[0];
        assert_eq!(first["checksTotal"], 1);
        assert_eq!(first["responseTimeMs"], 5);
        assert!(first.get("uptimePercent").is_some());
        assert!(first.get("lastCheck").is_some());
    }

    #[test]
    fn worker_flag_round_trips() {
        let store = MetricsStore::new();
        assert!(!store.worker_running());
        store.set_worker_running(true);
        assert!(store.worker_running());
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(MetricsStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.record_check("shared", "Shared", i % 2 == 0, 1, Utc::now());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let m = store.get_service_status("shared").unwrap();
        assert_eq!(m.checks_total, 800);
        assert_eq!(m.checks_successful + m.checks_failed, 800);
        assert_eq!(m.checks_successful, 400);
    }
}
