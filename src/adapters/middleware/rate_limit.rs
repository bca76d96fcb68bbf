//! Per-client rate limiting stage.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::SecondsFormat;
use http::{HeaderMap, HeaderValue, StatusCode, header};

use crate::{
    adapters::middleware::decorations::ResponseDecorations,
    core::{ErrorKind, FixedWindowLimiter, RateLimitDecision, client_identity, error_response},
};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

pub(crate) fn set_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(X_RATELIMIT_RESET, value);
    }
}

/// Consult the limiter for the caller. Denied requests get a `429` envelope
/// and never reach the next stage; every response carries the limit headers.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_identity(req.headers(), peer);
    let decision = limiter.check(&client);

    if !decision.allowed {
        let path = req.uri().path();
        tracing::warn!(client = %client, path = %path, limit = decision.limit, "rate limit exceeded");
        crate::metrics::increment_rate_limited();

        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::RateLimitExceeded,
            path,
            Some(format!(
                "limit of {} requests per {}s exceeded",
                decision.limit,
                limiter.window().as_secs().max(1)
            )),
        );
        let headers = response.headers_mut();
        set_rate_limit_headers(headers, &decision);
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from(limiter.window().as_secs().max(1)),
        );
        return response;
    }

    ResponseDecorations::record_on(&req, |decorations| decorations.record_rate_limit(decision));
    let mut response = next.run(req).await;
    set_rate_limit_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{Router, body::Body, middleware, routing::get};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::core::ErrorEnvelope;

    fn app(limiter: Arc<FixedWindowLimiter>) -> Router {
        Router::new()
            .route("/metrics", get(|| async { "up 1" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
    }

    fn request(ip: &str) -> Request {
        Request::builder()
            .uri("/metrics")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn headers_count_down_then_429() {
        let limiter = Arc::new(FixedWindowLimiter::new(3, Duration::from_secs(60)));
        let app = app(limiter);

        for expected in ["2", "1", "0"] {
            let response = app.clone().oneshot(request("203.0.113.9")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get(X_RATELIMIT_LIMIT).unwrap(), "3");
            assert_eq!(response.headers().get(X_RATELIMIT_REMAINING).unwrap(), expected);
            let reset = response.headers().get(X_RATELIMIT_RESET).unwrap().to_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(reset).is_ok());
        }

        let response = app.clone().oneshot(request("203.0.113.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
        assert_eq!(response.headers().get(X_RATELIMIT_REMAINING).unwrap(), "0");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope.error, "rate_limit_exceeded");
        assert_eq!(envelope.path, "/metrics");

        // another client is unaffected
        let response = app.oneshot(request("203.0.113.10")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_header_ignores_handler_latency() {
        let limiter = Arc::new(FixedWindowLimiter::new(3, Duration::from_secs(60)));
        let app = Router::new()
            .route(
                "/metrics",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    "up 1"
                }),
            )
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

        let before = chrono::Utc::now();
        let response = app.oneshot(request("203.0.113.9")).await.unwrap();
        let reset = response.headers().get(X_RATELIMIT_RESET).unwrap().to_str().unwrap();
        let reset = chrono::DateTime::parse_from_rfc3339(reset).unwrap();

        assert!(reset <= before + chrono::Duration::milliseconds(60_100), "{reset}");
        assert!(reset >= before + chrono::Duration::seconds(58), "{reset}");
    }

    #[tokio::test]
    async fn missing_identity_shares_one_bucket() {
        let limiter = Arc::new(FixedWindowLimiter::new(1, Duration::from_secs(60)));
        let app = app(limiter.clone());
        let anonymous = || Request::builder().uri("/metrics").body(Body::empty()).unwrap();

        assert_eq!(app.clone().oneshot(anonymous()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.oneshot(anonymous()).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
