//! Health check probe logic.
//!
//! Issues a bounded-timeout `GET` against a service's health URL and
//! classifies the outcome. Any 2xx is healthy regardless of body; network
//! errors, timeouts, and non-2xx responses are unhealthy.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use vigil_state::{ServiceId, ServiceStatus};

/// Fixed per-probe deadline.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent with every health probe.
pub const PROBE_USER_AGENT: &str = "Vigil-HealthCheck/1.0";

/// Classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    /// The persisted status this probe result maps to.
    pub fn service_status(self) -> ServiceStatus {
        match self {
            HealthStatus::Healthy => ServiceStatus::Active,
            HealthStatus::Unhealthy => ServiceStatus::Inactive,
        }
    }
}

/// Why a probe was classified unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("health check timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("invalid health url: {0}")]
    InvalidUrl(String),
}

/// Raw outcome of one probe, before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status_code: Option<u16>,
    pub error: Option<ProbeError>,
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn status(&self) -> HealthStatus {
        if self.error.is_none() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Result of checking one service. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub service_id: ServiceId,
    pub slug: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// HTTP prober shared by every probe of every cycle.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(PROBE_USER_AGENT)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `url` once. Never fails; every error becomes part of the outcome.
    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.client
                .get(url)
                .header(ACCEPT, "application/json")
                .send(),
        )
        .await;
        let elapsed = start.elapsed();

        let (status_code, error) = match result {
            Err(_) => {
                debug!(%url, "health probe timed out");
                (None, Some(ProbeError::Timeout(self.timeout)))
            }
            Ok(Err(e)) if e.is_timeout() => {
                debug!(%url, "health probe timed out");
                (None, Some(ProbeError::Timeout(self.timeout)))
            }
            Ok(Err(e)) if e.is_builder() => {
                debug!(error = %e, %url, "health probe url rejected");
                (None, Some(ProbeError::InvalidUrl(e.to_string())))
            }
            Ok(Err(e)) => {
                debug!(error = %e, %url, "health probe request failed");
                (None, Some(ProbeError::Network(e.to_string())))
            }
            Ok(Ok(resp)) => {
                let code = resp.status().as_u16();
                if resp.status().is_success() {
                    (Some(code), None)
                } else {
                    debug!(status = code, %url, "health probe non-2xx");
                    (Some(code), Some(ProbeError::HttpStatus(code)))
                }
            }
        };

        ProbeOutcome {
            status_code,
            error,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn prober(timeout: Duration) -> HealthProber {
        HealthProber::new(timeout).unwrap()
    }

    #[test]
    fn prober_keeps_its_timeout() {
        assert_eq!(prober(Duration::from_millis(750)).timeout(), Duration::from_millis(750));
    }

    #[test]
    fn status_maps_to_service_status() {
        assert_eq!(HealthStatus::Healthy.service_status(), ServiceStatus::Active);
        assert_eq!(HealthStatus::Unhealthy.service_status(), ServiceStatus::Inactive);
    }

    #[test]
    fn timeout_error_is_distinguishable() {
        let err = ProbeError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "health check timed out after 10000ms");
        assert_ne!(err, ProbeError::Network("timed out".to_string()));
    }

    #[tokio::test]
    async fn probe_2xx_is_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let outcome = prober(Duration::from_secs(2))
            .probe(&format!("{}/health", server.uri()))
            .await;
        assert_eq!(outcome.status(), HealthStatus::Healthy);
        assert_eq!(outcome.status_code, Some(204));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn probe_ignores_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"down"}"#))
            .mount(&server)
            .await;

        let outcome = prober(Duration::from_secs(2)).probe(&server.uri()).await;
        assert_eq!(outcome.status(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn probe_non_2xx_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let outcome = prober(Duration::from_secs(2)).probe(&server.uri()).await;
        assert_eq!(outcome.status(), HealthStatus::Unhealthy);
        assert_eq!(outcome.status_code, Some(500));
        assert_eq!(outcome.error, Some(ProbeError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn probe_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(200);
        let outcome = prober(timeout).probe(&server.uri()).await;
        assert_eq!(outcome.error, Some(ProbeError::Timeout(timeout)));
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn probe_to_closed_port_is_network_error() {
        let outcome = prober(Duration::from_secs(2))
            .probe("http://127.0.0.1:1/health")
            .await;
        assert_eq!(outcome.status(), HealthStatus::Unhealthy);
        assert!(matches!(outcome.error, Some(ProbeError::Network(_))));
        assert!(outcome.status_code.is_none());
    }
}
