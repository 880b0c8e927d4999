//! Health poller: periodic health check cycles over all registered services.
//!
//! The `HealthPoller` owns one background interval task. Each cycle reads
//! every service from the [`ServiceStore`], probes them concurrently,
//! persists the new status, emits transition events, and updates metrics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use vigil_metrics::MetricsStore;
use vigil_state::{ServiceRecord, ServiceStore, TransitionEvent};

use crate::checker::{DEFAULT_PROBE_TIMEOUT, HealthCheckResult, HealthProber, HealthStatus};

/// Default time between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Poller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Used by `initialize(None)`.
    pub interval: Duration,
    /// Per-probe deadline.
    pub probe_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Background interval task state.
struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    interval: Duration,
}

/// State shared between the poller handle and its background task.
struct PollerInner {
    store: Arc<dyn ServiceStore>,
    metrics: Arc<MetricsStore>,
    prober: HealthProber,
    events: Option<mpsc::UnboundedSender<TransitionEvent>>,
    /// Set while a cycle runs; a cycle that finds it set is skipped.
    cycle_in_progress: AtomicBool,
}

/// Periodically probes every registered service.
pub struct HealthPoller {
    inner: Arc<PollerInner>,
    config: PollerConfig,
    worker: Mutex<Option<WorkerSlot>>,
}

impl HealthPoller {
    /// Create a poller. No probing happens until `initialize` or
    /// `perform_health_checks` is called.
    pub fn new(
        store: Arc<dyn ServiceStore>,
        metrics: Arc<MetricsStore>,
        config: PollerConfig,
    ) -> reqwest::Result<Self> {
        let prober = HealthProber::new(config.probe_timeout)?;
        Ok(Self {
            inner: Arc::new(PollerInner {
                store,
                metrics,
                prober,
                events: None,
                cycle_in_progress: AtomicBool::new(false),
            }),
            config,
            worker: Mutex::new(None),
        })
    }

    /// Send transition events to `tx`.
    ///
    /// Events are queued in the order their probes complete, so two events
    /// for the same service always arrive in the order they happened.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TransitionEvent>) -> Self {
        // Only reachable before the poller is shared, so the Arc is unique.
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.events = Some(tx);
        } else {
            warn!("health poller already shared; transition events not attached");
        }
        self
    }

    /// Run one check cycle now, then every `interval` (default 60s).
    ///
    /// Calling this while the poller is already running logs and returns.
    pub async fn initialize(&self, interval: Option<Duration>) {
        let interval = interval.unwrap_or(self.config.interval);
        if interval.is_zero() {
            warn!("health poll interval must be non-zero; poller not started");
            return;
        }
        {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = worker.as_ref() {
                info!(
                    interval_ms = slot.interval.as_millis() as u64,
                    "health poller already running"
                );
                return;
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                run_poll_loop(inner, interval, shutdown_rx).await;
            });
            *worker = Some(WorkerSlot {
                handle,
                shutdown_tx,
                interval,
            });
            // Flipped under the lock so a concurrent `stop` cannot interleave.
            self.inner.metrics.set_worker_running(true);
        }

        info!(
            interval_ms = interval.as_millis() as u64,
            probe_timeout_ms = self.inner.prober.timeout().as_millis() as u64,
            "health poller started"
        );

        self.inner.run_cycle().await;
    }

    /// Cancel future cycles. Probes already in flight run to completion.
    pub fn stop(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = worker.take() {
            let _ = slot.shutdown_tx.send(true);
            // The task exits on its own once any running cycle finishes.
            drop(slot.handle);
            self.inner.metrics.set_worker_running(false);
            info!("health poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Probe every registered service concurrently and return one result
    /// per service.
    ///
    /// Returns an empty list if another cycle is still running.
    pub async fn perform_health_checks(&self) -> Vec<HealthCheckResult> {
        self.inner.run_cycle().await
    }

    /// Probe one service, persist its status, and emit a transition event
    /// if the status changed.
    pub async fn check_service_health(&self, service: &ServiceRecord) -> HealthCheckResult {
        self.inner.check_service_health(service).await
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.inner.metrics
    }
}

impl Drop for HealthPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the in-progress flag even if the cycle future is dropped.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollerInner {
    async fn run_cycle(&self) -> Vec<HealthCheckResult> {
        if self
            .cycle_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("previous health check cycle still running; skipping");
            return Vec::new();
        }
        let _guard = CycleGuard(&self.cycle_in_progress);

        let services = match self.store.list_services() {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "failed to load services for health check");
                return Vec::new();
            }
        };

        let results = join_all(services.iter().map(|svc| self.check_service_health(svc))).await;

        let healthy = results
            .iter()
            .filter(|r| r.status == HealthStatus::Healthy)
            .count();
        info!(healthy, total = results.len(), "health check cycle complete");
        results
    }

    async fn check_service_health(&self, service: &ServiceRecord) -> HealthCheckResult {
        let outcome = self.prober.probe(&service.health_url()).await;
        let checked_at = Utc::now();
        let status = outcome.status();
        let new_status = status.service_status();
        let response_time_ms = outcome.elapsed.as_millis() as u64;

        if let Err(e) = self
            .store
            .update_service_health(&service.id, new_status, checked_at)
        {
            error!(
                slug = %service.slug,
                error = %e,
                "failed to persist service health status"
            );
        }

        if let Some(event) = TransitionEvent::detect(service, new_status, checked_at) {
            info!(
                slug = %service.slug,
                event = %event.event,
                previous = %event.previous_status,
                current = %event.current_status,
                "service status changed"
            );
            self.emit(event);
        }

        self.metrics.record_check(
            &service.slug,
            &service.name,
            status == HealthStatus::Healthy,
            response_time_ms,
            checked_at,
        );

        HealthCheckResult {
            service_id: service.id.clone(),
            slug: service.slug.clone(),
            status,
            response_time_ms,
            status_code: outcome.status_code,
            error: outcome.error.map(|e| e.to_string()),
            checked_at,
        }
    }

    fn emit(&self, event: TransitionEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        if let Err(e) = tx.send(event) {
            debug!(slug = %e.0.slug, "no transition event consumer; event dropped");
        }
    }
}

/// The recurring cycle loop. The first tick fires one interval after start;
/// `initialize` runs the immediate cycle itself.
async fn run_poll_loop(
    inner: Arc<PollerInner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval_ms = interval.as_millis() as u64, "health poll loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                inner.run_cycle().await;
            }
            _ = shutdown.changed() => {
                debug!("health poll loop shutting down");
                break;
            }
        }
    }
}
