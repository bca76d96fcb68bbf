//! Route dispatch: health, metrics, diagnostics and the not-found fallback.
use std::{sync::Arc, time::Instant};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::Response,
    routing::get,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    config::models::ServerConfig,
    core::{
        ErrorKind, FixedWindowLimiter, HealthEnvelope,
        envelope::{error_response, json_response},
    },
    ports::{HealthSource, MetricsSource, RequestContext},
    utils::ConnectionTracker,
};

pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared, read-only state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub metrics: Arc<dyn MetricsSource>,
    pub health: Arc<dyn HealthSource>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub connections: ConnectionTracker,
    /// Cancelled when shutdown stops waiting for in-flight requests.
    pub abandon: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    /// Context handed to collaborators for one request.
    pub fn request_context(&self, headers: &HeaderMap) -> RequestContext {
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        RequestContext::new(
            request_id,
            self.config.write_timeout(),
            self.abandon.child_token(),
        )
    }
}

/// Build the dispatcher. Diagnostics routes exist only when enabled; any
/// other path or method falls through to a `404` envelope.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    if state.config.enable_diagnostics {
        router = router
            .route("/debug/vars", get(debug_vars_handler))
            .route("/debug/config", get(debug_config_handler))
            .route("/debug/connections", get(debug_connections_handler));
    }

    router
        .fallback(not_found_handler)
        .method_not_allowed_fallback(not_found_handler)
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = state.request_context(&headers);
    let report = state.health.check(&ctx).await;

    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        tracing::warn!(status = %report.status, "health check reported unhealthy");
        StatusCode::SERVICE_UNAVAILABLE
    };

    json_response(status, &HealthEnvelope::new(report.status, report.details))
}

async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Response {
    let ctx = state.request_context(&headers);

    match state.metrics.render(&ctx).await {
        Ok(text) => {
            let mut response = Response::new(Body::from(text));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(METRICS_CONTENT_TYPE),
            );
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "metrics source failed");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::MetricsError,
                uri.path(),
                None,
            )
        }
    }
}

async fn not_found_handler(uri: Uri) -> Response {
    error_response(StatusCode::NOT_FOUND, ErrorKind::NotFound, uri.path(), None)
}

async fn debug_vars_handler(State(state): State<AppState>) -> Response {
    let workers = tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_workers())
        .unwrap_or_default();

    json_response(
        StatusCode::OK,
        &json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mode": state.config.mode.to_string(),
            "uptime_secs": state.started_at.elapsed().as_secs_f64(),
            "runtime": { "workers": workers },
            "connections": state.connections.get_stats(),
            "rate_limiter": {
                "enabled": state.config.enable_rate_limit,
                "limit": state.limiter.limit(),
                "window_secs": state.limiter.window().as_secs(),
                "tracked_clients": state.limiter.tracked_clients(),
            },
        }),
    )
}

async fn debug_config_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.config.as_ref())
}

async fn debug_connections_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, &state.connections.snapshot())
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        core::ErrorEnvelope,
        ports::{HealthReport, SourceError},
    };

    pub(crate) struct StaticMetrics(pub Result<&'static str, &'static str>);

    #[async_trait]
    impl MetricsSource for StaticMetrics {
        async fn render(&self, _ctx: &RequestContext) -> Result<String, SourceError> {
            self.0
                .map(str::to_string)
                .map_err(|e| SourceError::Unavailable(e.to_string()))
        }
    }

    pub(crate) struct StaticHealth(pub &'static str);

    #[async_trait]
    impl HealthSource for StaticHealth {
        async fn check(&self, _ctx: &RequestContext) -> HealthReport {
            HealthReport::new(self.0).with_detail("checked", true)
        }
    }

    pub(crate) fn state(
        config: ServerConfig,
        metrics: Result<&'static str, &'static str>,
        health: &'static str,
    ) -> AppState {
        AppState {
            config: Arc::new(config),
            metrics: Arc::new(StaticMetrics(metrics)),
            health: Arc::new(StaticHealth(health)),
            limiter: Arc::new(FixedWindowLimiter::default()),
            connections: ConnectionTracker::new(),
            abandon: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    #[tokio::test]
    async fn health_ok_is_200_with_envelope() {
        for status in ["ok", "healthy"] {
            let app = router(state(ServerConfig::default(), Ok(""), status));
            let (code, _, body) = get(app, "/health").await;
            assert_eq!(code, StatusCode::OK);
            let envelope: HealthEnvelope = serde_json::from_slice(&body).unwrap();
            assert_eq!(envelope.status, status);
            assert_eq!(envelope.details["checked"], true);
        }
    }

    #[tokio::test]
    async fn health_other_status_is_503_with_envelope() {
        let app = router(state(ServerConfig::default(), Ok(""), "degraded"));
        let (code, headers, body) = get(app, "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        let envelope: HealthEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.status, "degraded");
    }

    #[tokio::test]
    async fn metrics_success_is_plain_text() {
        let app = router(state(ServerConfig::default(), Ok("up 1\n"), "ok"));
        let (code, headers, body) = get(app, "/metrics").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), METRICS_CONTENT_TYPE);
        assert_eq!(body, b"up 1\n");
    }

    #[tokio::test]
    async fn empty_metrics_is_200_with_empty_body() {
        let app = router(state(ServerConfig::default(), Ok(""), "ok"));
        let (code, _, body) = get(app, "/metrics").await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn metrics_failure_is_503_without_detail() {
        let app = router(state(ServerConfig::default(), Err("registry exploded"), "ok"));
        let (code, _, body) = get(app, "/metrics").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.error, "metrics_error");
        assert_eq!(envelope.path, "/metrics");
        assert!(!String::from_utf8_lossy(&body).contains("registry exploded"));
    }

    #[tokio::test]
    async fn unknown_path_and_wrong_method_are_404() {
        let app = router(state(ServerConfig::default(), Ok(""), "ok"));
        let (code, _, body) = get(app.clone(), "/nope").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.error, "not_found");
        assert_eq!(envelope.path, "/nope");

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn diagnostics_disabled_look_like_any_unmatched_path() {
        let app = router(state(ServerConfig::default(), Ok(""), "ok"));
        let (code, _, body) = get(app.clone(), "/debug/vars").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.error, "not_found");
    }

    #[tokio::test]
    async fn diagnostics_enabled_expose_runtime_state() {
        let config = ServerConfig::builder().diagnostics(true).build();
        let app = router(state(config, Ok(""), "ok"));

        let (code, _, body) = get(app.clone(), "/debug/vars").await;
        assert_eq!(code, StatusCode::OK);
        let vars: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(vars["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(vars["rate_limiter"]["limit"], 100);

        let (code, _, body) = get(app.clone(), "/debug/config").await;
        assert_eq!(code, StatusCode::OK);
        let config: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["enable_diagnostics"], true);

        let (code, _, body) = get(app, "/debug/connections").await;
        assert_eq!(code, StatusCode::OK);
        let connections: Value = serde_json::from_slice(&body).unwrap();
        assert!(connections.as_array().unwrap().is_empty());
    }
}
