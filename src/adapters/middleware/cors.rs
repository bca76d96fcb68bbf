//! Credentialed CORS that reflects the caller's origin.
use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};

use crate::adapters::middleware::decorations::ResponseDecorations;

pub const ALLOWED_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];
pub const ALLOWED_HEADERS: &[&str] = &[
    "Accept",
    "Authorization",
    "Content-Type",
    "Origin",
    "X-Requested-With",
    "X-Request-ID",
];
pub const EXPOSED_HEADERS: &str =
    "X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset, Retry-After, X-Request-ID";
pub const PREFLIGHT_MAX_AGE: &str = "86400";

/// Merge `requested` (a comma-separated list) into `base`, skipping
/// case-insensitive duplicates.
fn merged_list(base: &[&str], requested: Option<&HeaderValue>) -> String {
    let mut items: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    let requested = requested.and_then(|v| v.to_str().ok()).unwrap_or_default();
    for item in requested.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !items.iter().any(|known| known.eq_ignore_ascii_case(item)) {
            items.push(item.to_string());
        }
    }
    items.join(", ")
}

fn set_list(headers: &mut HeaderMap, name: header::HeaderName, value: String) {
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => tracing::debug!(header = %name, error = %e, "skipping unrepresentable CORS header"),
    }
}

fn set_common(headers: &mut HeaderMap, origin: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    let varies_by_origin = headers.get_all(header::VARY).iter().any(|value| {
        value
            .to_str()
            .is_ok_and(|v| v.split(',').any(|name| name.trim().eq_ignore_ascii_case("origin")))
    });
    if !varies_by_origin {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

/// Headers for a non-preflight response to a cross-origin request.
pub(crate) fn set_response_headers(headers: &mut HeaderMap, origin: HeaderValue) {
    set_common(headers, origin);
    set_list(headers, header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS.join(", "));
    set_list(headers, header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS.join(", "));
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
}

/// Without an `Origin` header the request passes through untouched.
/// Preflights are answered here with `204` and never reach the next stage.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    let Some(origin) = req.headers().get(header::ORIGIN).cloned() else {
        return next.run(req).await;
    };

    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;

        let headers = response.headers_mut();
        set_common(headers, origin);
        set_list(
            headers,
            header::ACCESS_CONTROL_ALLOW_METHODS,
            merged_list(
                ALLOWED_METHODS,
                req.headers().get(header::ACCESS_CONTROL_REQUEST_METHOD),
            ),
        );
        set_list(
            headers,
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            merged_list(
                ALLOWED_HEADERS,
                req.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS),
            ),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE),
        );
        return response;
    }

    ResponseDecorations::record_on(&req, |decorations| decorations.record_origin(origin.clone()));
    let mut response = next.run(req).await;
    set_response_headers(response.headers_mut(), origin);
    response
}
