//! Assembly of the middleware stages around the dispatcher.
use std::sync::Arc;

use axum::{Router, middleware};

use crate::{
    adapters::middleware::{
        access_log_middleware, catch_panic_layer, cors_middleware, install_panic_hook,
        rate_limit_middleware, recovery_middleware,
    },
    config::models::ServerConfig,
    core::FixedWindowLimiter,
};

/// One interceptor in the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Recovery,
    Logging,
    Cors,
    RateLimit,
}

/// Ordered list of stages, outermost first. Built once from a validated
/// configuration and never changed afterwards.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
    limiter: Arc<FixedWindowLimiter>,
}

impl Pipeline {
    pub fn from_config(config: &ServerConfig, limiter: Arc<FixedWindowLimiter>) -> Self {
        let stages = [
            Some(Stage::Recovery),
            Some(Stage::Logging),
            config.enable_cors.then_some(Stage::Cors),
            config.enable_rate_limit.then_some(Stage::RateLimit),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self { stages, limiter }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wrap `router` so a request meets the stages in order. The last layer
    /// added is the outermost, hence the reverse fold.
    pub fn apply(&self, router: Router) -> Router {
        if self.stages.contains(&Stage::Recovery) {
            install_panic_hook();
        }

        self.stages.iter().rev().fold(router, |router, stage| match stage {
            Stage::Recovery => router
                .layer(catch_panic_layer())
                .layer(middleware::from_fn(recovery_middleware)),
            Stage::Logging => router.layer(middleware::from_fn(access_log_middleware)),
            Stage::Cors => router.layer(middleware::from_fn(cors_middleware)),
            Stage::RateLimit => router.layer(middleware::from_fn_with_state(
                self.limiter.clone(),
                rate_limit_middleware,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{HeaderValue, Request, StatusCode, header},
        routing::get,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::core::ErrorEnvelope;

    #[test]
    fn stages_follow_configuration_in_fixed_order() {
        let limiter = Arc::new(FixedWindowLimiter::default());

        let minimal = Pipeline::from_config(&ServerConfig::default(), limiter.clone());
        assert_eq!(minimal.stages(), &[Stage::Recovery, Stage::Logging]);

        let config = ServerConfig::builder().cors(true).rate_limit(true).build();
        let full = Pipeline::from_config(&config, limiter.clone());
        assert_eq!(
            full.stages(),
            &[Stage::Recovery, Stage::Logging, Stage::Cors, Stage::RateLimit]
        );

        let config = ServerConfig::builder().rate_limit(true).build();
        let limited = Pipeline::from_config(&config, limiter);
        assert_eq!(limited.stages(), &[Stage::Recovery, Stage::Logging, Stage::RateLimit]);
    }

    #[tokio::test]
    async fn panics_become_internal_server_error_envelopes() {
        let config = ServerConfig::default();
        let pipeline = Pipeline::from_config(&config, Arc::new(FixedWindowLimiter::default()));
        let app = pipeline.apply(
            Router::new()
                .route("/boom", get(|| async { panic!("kaboom") as () }))
                .route("/fine", get(|| async { "fine" })),
        );

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope.error, "internal_server_error");
        assert_eq!(envelope.path, "/boom");

        let response = app
            .oneshot(Request::builder().uri("/fine").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_runs_before_rate_limiting() {
        let config = ServerConfig::builder()
            .cors(true)
            .rate_limit(true)
            .rate_limit_quota(1, "1m")
            .build();
        let limiter = Arc::new(FixedWindowLimiter::from_settings(&config.rate_limit));
        let app = Pipeline::from_config(&config, limiter.clone())
            .apply(Router::new().route("/metrics", get(|| async { "up 1" })));

        // preflights are answered by CORS and never consume quota
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("OPTIONS")
                        .uri("/metrics")
                        .header(header::ORIGIN, "https://dash.example.com")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert_eq!(limiter.tracked_clients(), 0);

        let simple = || {
            Request::builder()
                .uri("/metrics")
                .header(header::ORIGIN, "https://dash.example.com")
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(app.clone().oneshot(simple()).await.unwrap().status(), StatusCode::OK);

        let denied = app.oneshot(simple()).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        // the rejection still carries CORS headers so browsers can read it
        assert_eq!(
            denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://dash.example.com"))
        );
    }
}
