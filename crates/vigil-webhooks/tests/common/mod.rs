//! Shared fixtures for webhook delivery integration tests.
//!
//! Webhook targets are local wiremock servers; services and subscriptions
//! live in an in-memory state store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::{Request, Respond, ResponseTemplate};

use vigil_state::*;
use vigil_webhooks::{DeliveryConfig, DeliveryEngine, Sleeper};

pub const SECRET: &str = "whsec_test_secret_key_12345";

/// A URL nothing listens on.
pub const REFUSED_URL: &str = "http://127.0.0.1:1/webhook";

pub fn service(id: &str, slug: &str) -> ServiceRecord {
    ServiceRecord {
        id: id.to_string(),
        slug: slug.to_string(),
        name: format!("{slug} service"),
        base_url: "http://127.0.0.1:1".to_string(),
        health_endpoint: "/health".to_string(),
        status: ServiceStatus::Active,
        last_health_check: None,
        updated_at: None,
    }
}

pub fn subscription(
    id: &str,
    service_id: &str,
    target_url: &str,
    events: &[&str],
) -> WebhookSubscription {
    WebhookSubscription {
        id: id.to_string(),
        service_id: service_id.to_string(),
        target_url: target_url.to_string(),
        secret: SECRET.to_string(),
        events: events.iter().map(|e| e.to_string()).collect::<Vec<_>>().into(),
        is_active: true,
        max_retries: None,
        last_delivery: None,
        last_delivery_status: None,
        failure_count: 0,
        updated_at: None,
    }
}

/// Records every backoff delay instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn sleeper(&self) -> Sleeper {
        let delays = Arc::clone(&self.delays);
        Arc::new(move |delay| {
            delays.lock().unwrap().push(delay);
            Box::pin(async {})
        })
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

pub fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|s| Duration::from_secs(*s)).collect()
}

pub fn engine_with(
    store: &StateStore,
    config: DeliveryConfig,
    sleeper: &RecordingSleeper,
) -> DeliveryEngine {
    let store = Arc::new(store.clone());
    DeliveryEngine::new(store.clone(), store, config)
        .unwrap()
        .with_sleeper(sleeper.sleeper())
}

pub fn engine(store: &StateStore, sleeper: &RecordingSleeper) -> DeliveryEngine {
    engine_with(store, DeliveryConfig::default(), sleeper)
}

/// A captured webhook request.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Captures incoming requests and answers with a fixed status.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: u16,
    delay: Duration,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Wait until at least `n` requests arrived or `timeout` passes.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<CapturedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.request_count() < n && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.requests()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.status).set_delay(self.delay)
    }
}
