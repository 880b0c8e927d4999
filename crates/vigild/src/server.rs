//! Metrics HTTP surface.
//!
//! `GET /metrics` serves the Prometheus text exposition; the JSON routes
//! return the same data per service.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use vigil_metrics::MetricsStore;

#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<MetricsStore>,
}

pub fn build_router(metrics: Arc<MetricsStore>) -> Router {
    let state = MetricsState { metrics };
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/metrics/json", get(metrics_json))
        .route("/metrics/services/{slug}", get(service_metrics))
        .with_state(state)
}

/// GET /metrics
async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.get_prometheus_metrics(),
    )
}

/// GET /metrics/json
async fn metrics_json(State(state): State<MetricsState>) -> impl IntoResponse {
    Json(state.metrics.get_metrics_json())
}

/// GET /metrics/services/:slug
async fn service_metrics(
    State(state): State<MetricsState>,
    Path(slug): Path<String>,
) -> Response {
    match state.metrics.get_service_status(&slug) {
        Some(m) => Json(m).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "service not found", "slug": slug })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    use super::*;

    fn seeded_metrics() -> Arc<MetricsStore> {
        let metrics = Arc::new(MetricsStore::new());
        metrics.record_check("tracking-api", "Tracking API", true, 42, Utc::now());
        metrics.record_check("billing-api", "Billing API", false, 10_000, Utc::now());
        metrics.set_worker_running(true);
        metrics
    }

    async fn fetch(router: Router, uri: &str) -> (StatusCode, String, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn prometheus_endpoint() {
        let (status, content_type, body) = fetch(build_router(seeded_metrics()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/plain; version=0.0.4"));
        assert!(
            body.contains(r#"ecosystem_service_up{service="tracking-api",name="Tracking API"} 1"#)
        );
        assert!(
            body.contains(r#"ecosystem_service_up{service="billing-api",name="Billing API"} 0"#)
        );
        assert!(body.contains("ecosystem_services_total 2\n"));
        assert!(body.contains("ecosystem_services_healthy 1\n"));
        assert!(body.contains("ecosystem_health_worker_running 1\n"));
    }

    #[tokio::test]
    async fn json_endpoint_lists_every_service() {
        let (status, content_type, body) =
            fetch(build_router(seeded_metrics()), "/metrics/json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("application/json"));

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        let services = json.as_array().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0]["slug"], "billing-api");
        assert_eq!(services[1]["slug"], "tracking-api");
        assert_eq!(services[1]["uptimePercent"], 100.0);
    }

    #[tokio::test]
    async fn single_service_lookup() {
        let (status, _, body) =
            fetch(build_router(seeded_metrics()), "/metrics/services/tracking-api").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["name"], "Tracking API");
        assert_eq!(json["responseTimeMs"], 42);
        assert_eq!(json["checksTotal"], 1);
    }

    #[tokio::test]
    async fn unknown_service_is_404() {
        let (status, _, body) =
            fetch(build_router(seeded_metrics()), "/metrics/services/ghost").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["slug"], "ghost");
    }

    #[tokio::test]
    async fn empty_store_renders_zero_totals() {
        let (status, _, body) =
            fetch(build_router(Arc::new(MetricsStore::new())), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ecosystem_services_total 0\n"));
        assert!(body.contains("ecosystem_health_worker_running 0\n"));
    }
}
