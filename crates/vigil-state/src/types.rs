//! Domain types for the Vigil state store.
//!
//! These types represent persisted service and webhook subscription rows,
//! plus the transition event raised when a service flips between active
//! and inactive. Persisted types are serialized to JSON for storage in
//! redb tables.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Unique identifier for a registered service.
pub type ServiceId = String;

/// Unique identifier for a webhook subscription.
pub type SubscriptionId = String;

/// Wildcard entry in a subscription's event list.
pub const WILDCARD_EVENT: &str = "*";

// ── Service ───────────────────────────────────────────────────────

/// Persisted health status of a service. Written only by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Active,
    Inactive,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered backend service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub id: ServiceId,
    /// Unique, URL-safe short name (e.g. `tracking-api`).
    pub slug: String,
    pub name: String,
    /// Scheme + host (+ optional path prefix), e.g. `https://tracking.internal`.
    pub base_url: String,
    /// Path appended to `base_url` for the health probe, e.g. `/health`.
    pub health_endpoint: String,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ServiceRecord {
    /// Full URL probed by the health poller.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_endpoint)
    }

    /// Reject rows that the poller could never probe.
    pub fn validate(&self) -> StateResult<()> {
        if self.id.trim().is_empty() {
            return Err(StateError::Invalid("service id is empty".to_string()));
        }
        if !is_valid_slug(&self.slug) {
            return Err(StateError::Invalid(format!(
                "service slug {:?} must be non-empty lowercase alphanumerics, '-' or '_'",
                self.slug
            )));
        }
        validate_http_url(&self.base_url)
            .map_err(|e| StateError::Invalid(format!("service {}: base_url {e}", self.slug)))?;
        if !self.health_endpoint.is_empty() && !self.health_endpoint.starts_with('/') {
            return Err(StateError::Invalid(format!(
                "service {}: health_endpoint must start with '/'",
                self.slug
            )));
        }
        validate_http_url(&self.health_url())
            .map_err(|e| StateError::Invalid(format!("service {}: health url {e}", self.slug)))?;
        Ok(())
    }
}

// ── Webhook subscription ──────────────────────────────────────────

/// Which events a subscription wants: an explicit set, or everything (`"*"`).
///
/// Serialized as a plain list of event names; a list containing `"*"`
/// deserializes to [`EventFilter::All`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum EventFilter {
    All,
    Only(BTreeSet<String>),
}

impl EventFilter {
    pub fn matches(&self, event: &str) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(events) => events.contains(event),
        }
    }
}

impl From<Vec<String>> for EventFilter {
    fn from(events: Vec<String>) -> Self {
        if events.iter().any(|e| e == WILDCARD_EVENT) {
            EventFilter::All
        } else {
            EventFilter::Only(events.into_iter().collect())
        }
    }
}

impl From<EventFilter> for Vec<String> {
    fn from(filter: EventFilter) -> Self {
        match filter {
            EventFilter::All => vec![WILDCARD_EVENT.to_string()],
            EventFilter::Only(events) => events.into_iter().collect(),
        }
    }
}

/// Outcome of the most recent delivery sequence for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// A registered `(target URL, secret, event filter)` tuple tied to a service.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookSubscription {
    pub id: SubscriptionId,
    pub service_id: ServiceId,
    pub target_url: String,
    /// Shared HMAC secret. Never logged.
    pub secret: String,
    pub events: EventFilter,
    pub is_active: bool,
    /// Per-subscription attempt bound; the engine default applies when `None`.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub last_delivery: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_delivery_status: Option<DeliveryStatus>,
    /// Exhausted delivery sequences since the last success.
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WebhookSubscription {
    pub fn validate(&self) -> StateResult<()> {
        if self.id.trim().is_empty() {
            return Err(StateError::Invalid("subscription id is empty".to_string()));
        }
        if self.service_id.trim().is_empty() {
            return Err(StateError::Invalid(format!(
                "subscription {}: service_id is empty",
                self.id
            )));
        }
        validate_http_url(&self.target_url)
            .map_err(|e| StateError::Invalid(format!("subscription {}: target_url {e}", self.id)))?;
        if self.secret.is_empty() {
            return Err(StateError::Invalid(format!(
                "subscription {}: secret is empty",
                self.id
            )));
        }
        if self.max_retries == Some(0) {
            return Err(StateError::Invalid(format!(
                "subscription {}: max_retries must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for WebhookSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSubscription")
            .field("id", &self.id)
            .field("service_id", &self.service_id)
            .field("target_url", &self.target_url)
            .field("secret", &"<redacted>")
            .field("events", &self.events)
            .field("is_active", &self.is_active)
            .field("max_retries", &self.max_retries)
            .field("last_delivery", &self.last_delivery)
            .field("last_delivery_status", &self.last_delivery_status)
            .field("failure_count", &self.failure_count)
            .finish()
    }
}

// ── Transition events ─────────────────────────────────────────────

/// Event names raised by the health poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceEvent {
    #[serde(rename = "service.recovered")]
    Recovered,
    #[serde(rename = "service.degraded")]
    Degraded,
}

impl ServiceEvent {
    /// The event fired when a service moves into `current`.
    pub fn for_status(current: ServiceStatus) -> Self {
        if current == ServiceStatus::Active {
            ServiceEvent::Recovered
        } else {
            ServiceEvent::Degraded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceEvent::Recovered => "service.recovered",
            ServiceEvent::Degraded => "service.degraded",
        }
    }
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised exactly when a poll changes a service's persisted status.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub service_id: ServiceId,
    pub slug: String,
    pub event: ServiceEvent,
    pub previous_status: ServiceStatus,
    pub current_status: ServiceStatus,
    pub changed_at: DateTime<Utc>,
}

impl TransitionEvent {
    /// Returns `None` when the status did not change.
    pub fn detect(
        service: &ServiceRecord,
        current_status: ServiceStatus,
        changed_at: DateTime<Utc>,
    ) -> Option<Self> {
        if service.status == current_status {
            return None;
        }
        Some(Self {
            service_id: service.id.clone(),
            slug: service.slug.clone(),
            event: ServiceEvent::for_status(current_status),
            previous_status: service.status,
            current_status,
            changed_at,
        })
    }

    /// The `data` object carried in the webhook payload.
    pub fn data(&self) -> serde_json::Value {
        serde_json::json!({
            "previousStatus": self.previous_status,
            "currentStatus": self.current_status,
            "changedAt": self.changed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "slug": self.slug,
        })
    }
}

// ── Validation helpers ────────────────────────────────────────────

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn validate_http_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("is not a valid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(format!("has unsupported scheme {scheme:?}")),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err("has no host".to_string());
    }
    Ok(())
}
