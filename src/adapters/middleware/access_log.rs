//! Structured access logging and request metrics.
use std::{
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use http::{HeaderMap, StatusCode, header};

/// Everything logged about a request, captured before it is handed on.
#[derive(Debug)]
struct AccessRecord {
    method: String,
    path: String,
    route: String,
    query: String,
    params: Vec<(String, String)>,
    remote_addr: String,
    user_agent: String,
    referer: String,
    request_id: String,
    started: Instant,
}

impl AccessRecord {
    fn from_request(req: &Request) -> Self {
        let query = req.uri().query().unwrap_or_default().to_string();
        let params = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());

        Self {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            route,
            query,
            params,
            remote_addr,
            user_agent: header_str(req.headers(), header::USER_AGENT.as_str()),
            referer: header_str(req.headers(), header::REFERER.as_str()),
            request_id: header_str(req.headers(), "x-request-id"),
            started: Instant::now(),
        }
    }

    fn emit(&self, status: StatusCode, latency: Duration) {
        macro_rules! access {
            ($level:ident, $record:expr) => {
                tracing::$level!(
                    method = %$record.method,
                    path = %$record.path,
                    query = %$record.query,
                    params = ?$record.params,
                    status = status.as_u16(),
                    latency_ms = latency.as_secs_f64() * 1000.0,
                    remote_addr = %$record.remote_addr,
                    user_agent = %$record.user_agent,
                    referer = %$record.referer,
                    request_id = %$record.request_id,
                    "request completed"
                )
            };
        }

        if status.is_server_error() {
            access!(error, self);
        } else if status.is_client_error() {
            access!(warn, self);
        } else {
            access!(info, self);
        }

        crate::metrics::increment_request_total(&self.method, &self.route, status.as_u16());
        crate::metrics::record_request_duration(&self.method, &self.route, status.as_u16(), latency);
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Reports the request as aborted if its future is dropped before a
/// response exists.
struct AccessLogGuard {
    record: Option<AccessRecord>,
}

impl AccessLogGuard {
    fn finish(mut self, status: StatusCode) {
        if let Some(record) = self.record.take() {
            record.emit(status, record.started.elapsed());
        }
    }
}

impl Drop for AccessLogGuard {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };
        tracing::warn!(
            method = %record.method,
            path = %record.path,
            remote_addr = %record.remote_addr,
            latency_ms = record.started.elapsed().as_secs_f64() * 1000.0,
            "request aborted before completion"
        );
    }
}

/// Log every request with its outcome. 5xx at error, 4xx at warn, the rest at
/// info. A panicking handler is logged as a 500 and the panic continues
/// outwards to the recovery stage.
pub async fn access_log_middleware(req: Request, next: Next) -> Response {
    let guard = AccessLogGuard {
        record: Some(AccessRecord::from_request(&req)),
    };

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => {
            guard.finish(response.status());
            response
        }
        Err(payload) => {
            guard.finish(StatusCode::INTERNAL_SERVER_ERROR);
            panic::resume_unwind(payload)
        }
    }
}
