//! Webhook delivery engine.
//!
//! Finds the active subscriptions for a service event, builds one shared
//! payload, and delivers it to every match concurrently. Attempts against a
//! single subscription are strictly sequential and retried with capped
//! exponential backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use vigil_state::{ServiceRecord, ServiceStore, SubscriptionStore, WebhookSubscription};

use crate::error::{DeliveryError, WebhookError};
use crate::retry::{RetryPolicy, Sleeper, retry, tokio_sleeper};
use crate::signature::generate_signature;
use crate::stats::{DeliveryStats, DeliveryStatsSnapshot};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const ID_HEADER: &str = "X-Webhook-Id";

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = "Vigil-Webhook/1.0";

/// The service an event is about, as embedded in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadService {
    pub id: String,
    pub slug: String,
    pub name: String,
}

impl From<&ServiceRecord> for PayloadService {
    fn from(svc: &ServiceRecord) -> Self {
        Self {
            id: svc.id.clone(),
            slug: svc.slug.clone(),
            name: svc.name.clone(),
        }
    }
}

/// JSON body POSTed to subscribers. Shared by every delivery of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    /// ISO-8601 UTC with millisecond precision.
    pub timestamp: String,
    pub data: serde_json::Value,
    pub service: PayloadService,
}

impl WebhookPayload {
    pub fn new(event: &str, data: serde_json::Value, service: &ServiceRecord) -> Self {
        Self {
            event: event.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
            service: service.into(),
        }
    }
}

/// Outcome of one delivery sequence against one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub webhook_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Duration of the final attempt.
    pub response_time_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-call overrides for [`DeliveryEngine::deliver_webhook`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Total attempts; wins over the subscription's own `max_retries`.
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub retry: RetryPolicy,
    /// Per-attempt deadline.
    pub timeout: Duration,
    pub user_agent: String,
    /// Deactivate a subscription once its persisted failure count reaches
    /// this value. `None` never deactivates.
    pub disable_after_failures: Option<u32>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            disable_after_failures: None,
        }
    }
}

/// Delivers service events to webhook subscribers.
#[derive(Clone)]
pub struct DeliveryEngine {
    services: Arc<dyn ServiceStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    client: reqwest::Client,
    config: DeliveryConfig,
    sleeper: Sleeper,
    stats: Arc<DeliveryStats>,
}

impl DeliveryEngine {
    pub fn new(
        services: Arc<dyn ServiceStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        config: DeliveryConfig,
    ) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            services,
            subscriptions,
            client,
            config,
            sleeper: tokio_sleeper(),
            stats: Arc::new(DeliveryStats::new()),
        })
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver `event` for the service identified by `service_slug` to every
    /// active subscription that wants it.
    ///
    /// Returns one result per matching subscription; an unknown slug or a
    /// storage read failure yields an empty list.
    pub async fn trigger_event(
        &self,
        service_slug: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Vec<DeliveryResult> {
        let service = match self.services.get_service_by_slug(service_slug) {
            Ok(Some(svc)) => svc,
            Ok(None) => {
                warn!(slug = %service_slug, %event, "event for unknown service; nothing delivered");
                return Vec::new();
            }
            Err(e) => {
                error!(slug = %service_slug, error = %e, "failed to load service for event");
                return Vec::new();
            }
        };

        let subscriptions = match self.subscriptions.list_active_subscriptions(&service.id) {
            Ok(subs) => subs,
            Err(e) => {
                error!(slug = %service_slug, error = %e, "failed to load webhook subscriptions");
                return Vec::new();
            }
        };

        let matching: Vec<_> = subscriptions
            .iter()
            .filter(|sub| sub.is_active && sub.events.matches(event))
            .collect();
        if matching.is_empty() {
            debug!(slug = %service_slug, %event, "no subscriptions for event");
            return Vec::new();
        }

        let payload = WebhookPayload::new(event, data, &service);
        let results = join_all(
            matching
                .iter()
                .map(|sub| self.deliver_webhook(sub, &payload, DeliveryOptions::default())),
        )
        .await;

        let delivered = results.iter().filter(|r| r.success).count();
        info!(
            slug = %service_slug,
            %event,
            delivered,
            total = results.len(),
            "event dispatched to webhooks"
        );
        results
    }

    /// Deliver `payload` to one subscription, retrying on failure.
    ///
    /// Never fails; every error is reported in the returned result.
    /// Persisting the delivery outcome is best-effort.
    pub async fn deliver_webhook(
        &self,
        subscription: &WebhookSubscription,
        payload: &WebhookPayload,
        options: DeliveryOptions,
    ) -> DeliveryResult {
        let max_attempts = options
            .max_retries
            .or(subscription.max_retries)
            .unwrap_or(self.config.retry.max_attempts)
            .max(1);

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                let err = DeliveryError::Serialize(e.to_string());
                error!(
                    webhook_id = %subscription.id,
                    error = %err,
                    "webhook payload not serializable"
                );
                return DeliveryResult {
                    webhook_id: subscription.id.clone(),
                    success: false,
                    status_code: None,
                    response_time_ms: 0,
                    attempts: 0,
                    error: Some(err.to_string()),
                };
            }
        };
        let signature = generate_signature(&body, &subscription.secret);

        let policy = self.config.retry.with_max_attempts(max_attempts);
        let last_elapsed_ms = AtomicU64::new(0);
        let outcome = retry(&policy, &self.sleeper, |attempt| {
            let body = &body;
            let signature = signature.as_str();
            let last_elapsed_ms = &last_elapsed_ms;
            async move {
                self.stats.record_attempt(attempt);
                let start = Instant::now();
                let result = self.send_once(subscription, payload, body, signature).await;
                last_elapsed_ms.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);

                if let Err(e) = &result {
                    warn!(
                        webhook_id = %subscription.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "webhook delivery attempt failed"
                    );
                }
                result
            }
        })
        .await;

        let response_time_ms = last_elapsed_ms.load(Ordering::Relaxed);
        let now = Utc::now();
        match outcome.result {
            Ok(status_code) => {
                self.stats.record_outcome(true);
                if let Err(e) = self.subscriptions.record_delivery_success(&subscription.id, now) {
                    error!(
                        webhook_id = %subscription.id,
                        error = %e,
                        "failed to record webhook success"
                    );
                }
                debug!(
                    webhook_id = %subscription.id,
                    status = status_code,
                    attempts = outcome.attempts,
                    "webhook delivered"
                );
                DeliveryResult {
                    webhook_id: subscription.id.clone(),
                    success: true,
                    status_code: Some(status_code),
                    response_time_ms,
                    attempts: outcome.attempts,
                    error: None,
                }
            }
            Err(err) => {
                self.stats.record_outcome(false);
                warn!(
                    webhook_id = %subscription.id,
                    attempts = outcome.attempts,
                    error = %err,
                    "webhook delivery failed after all attempts"
                );
                self.record_failure(subscription, now);
                DeliveryResult {
                    webhook_id: subscription.id.clone(),
                    success: false,
                    status_code: err.status_code(),
                    response_time_ms,
                    attempts: outcome.attempts,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    pub fn get_stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    async fn send_once(
        &self,
        subscription: &WebhookSubscription,
        payload: &WebhookPayload,
        body: &[u8],
        signature: &str,
    ) -> Result<u16, DeliveryError> {
        let request = self
            .client
            .post(&subscription.target_url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, payload.event.as_str())
            .header(TIMESTAMP_HEADER, payload.timestamp.as_str())
            .header(ID_HEADER, subscription.id.as_str())
            .body(body.to_vec());

        match tokio::time::timeout(self.config.timeout, request.send()).await {
            Err(_) => Err(DeliveryError::Timeout(self.config.timeout)),
            Ok(Err(e)) if e.is_timeout() => Err(DeliveryError::Timeout(self.config.timeout)),
            Ok(Err(e)) if e.is_builder() => Err(DeliveryError::InvalidUrl(e.to_string())),
            Ok(Err(e)) => Err(DeliveryError::Network(e.to_string())),
            Ok(Ok(resp)) if resp.status().is_success() => Ok(resp.status().as_u16()),
            Ok(Ok(resp)) => Err(DeliveryError::HttpStatus(resp.status().as_u16())),
        }
    }

    /// Bump the persisted failure count and deactivate the subscription if
    /// it crossed the configured threshold.
    fn record_failure(&self, subscription: &WebhookSubscription, at: chrono::DateTime<Utc>) {
        let failure_count = match self.subscriptions.record_delivery_failure(&subscription.id, at) {
            Ok(count) => count,
            Err(e) => {
                error!(
                    webhook_id = %subscription.id,
                    error = %e,
                    "failed to record webhook failure"
                );
                return;
            }
        };

        let Some(threshold) = self.config.disable_after_failures else {
            return;
        };
        if failure_count < threshold {
            return;
        }
        match self.subscriptions.deactivate_subscription(&subscription.id) {
            Ok(()) => warn!(
                webhook_id = %subscription.id,
                failure_count,
                threshold,
                "webhook subscription disabled after repeated failures"
            ),
            Err(e) => error!(
                webhook_id = %subscription.id,
                error = %e,
                "failed to disable webhook subscription"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use vigil_state::{ServiceStatus, StateStore};

    use super::*;

    fn tracking_service() -> ServiceRecord {
        ServiceRecord {
            id: "svc-1".to_string(),
            slug: "tracking-api".to_string(),
            name: "Tracking API".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            health_endpoint: "/health".to_string(),
            status: ServiceStatus::Active,
            last_health_check: None,
            updated_at: None,
        }
    }

    #[test]
    fn payload_shape() {
        let payload = WebhookPayload::new(
            "service.degraded",
            serde_json::json!({"slug": "tracking-api"}),
            &tracking_service(),
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "service.degraded");
        assert_eq!(json["data"]["slug"], "tracking-api");
        assert_eq!(json["service"]["id"], "svc-1");
        assert_eq!(json["service"]["slug"], "tracking-api");
        assert_eq!(json["service"]["name"], "Tracking API");

        let ts = json["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn result_serializes_camel_case_and_omits_empty_fields() {
        let result = DeliveryResult {
            webhook_id: "wh-1".to_string(),
            success: true,
            status_code: Some(200),
            response_time_ms: 12,
            attempts: 1,
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["webhookId"], "wh-1");
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["responseTimeMs"], 12);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn default_config() {
        let config = DeliveryConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.user_agent, "Vigil-Webhook/1.0");
        assert_eq!(config.disable_after_failures, None);
    }

    #[tokio::test]
    async fn unknown_slug_yields_no_results() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let engine = DeliveryEngine::new(store.clone(), store, DeliveryConfig::default()).unwrap();
        assert_eq!(engine.config(), &DeliveryConfig::default());

        let results = engine
            .trigger_event("nonexistent-service", "service.degraded", serde_json::json!({}))
            .await;
        assert!(results.is_empty());
        assert_eq!(engine.get_stats(), DeliveryStatsSnapshot::default());
    }
}
