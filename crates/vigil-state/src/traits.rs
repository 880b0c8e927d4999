//! Storage seams used by the poller and the delivery engine.
//!
//! Both traits only expose point reads and single-row updates. Any backend
//! (the embedded [`StateStore`](crate::StateStore), a SQL table, a test
//! double) can sit behind them.

use chrono::{DateTime, Utc};

use crate::error::StateResult;
use crate::types::{ServiceRecord, ServiceStatus, WebhookSubscription};

/// Read/write access to registered services.
pub trait ServiceStore: Send + Sync {
    /// All registered services.
    fn list_services(&self) -> StateResult<Vec<ServiceRecord>>;

    /// Point lookup by unique slug.
    fn get_service_by_slug(&self, slug: &str) -> StateResult<Option<ServiceRecord>>;

    /// Write `{status, last_health_check, updated_at}` for one service.
    fn update_service_health(
        &self,
        id: &str,
        status: ServiceStatus,
        checked_at: DateTime<Utc>,
    ) -> StateResult<()>;
}

/// Read/write access to webhook subscriptions.
pub trait SubscriptionStore: Send + Sync {
    /// Active subscriptions registered for a service.
    fn list_active_subscriptions(&self, service_id: &str) -> StateResult<Vec<WebhookSubscription>>;

    /// Mark a delivery sequence successful and reset `failure_count` to 0.
    fn record_delivery_success(&self, id: &str, at: DateTime<Utc>) -> StateResult<()>;

    /// Mark a delivery sequence failed and increment `failure_count` by one
    /// as a single atomic update. Returns the new count.
    fn record_delivery_failure(&self, id: &str, at: DateTime<Utc>) -> StateResult<u32>;

    /// Set `is_active = false`.
    fn deactivate_subscription(&self, id: &str) -> StateResult<()>;
}
