//! Uniform JSON bodies for error and health responses.
use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::{HeaderValue, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Machine-readable error codes carried in `ErrorEnvelope::error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InternalServerError,
    RateLimitExceeded,
    MetricsError,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InternalServerError => "internal_server_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::MetricsError => "metrics_error",
            ErrorKind::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    pub timestamp: String,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, path: impl Into<String>, message: Option<String>) -> Self {
        Self {
            error: kind.as_str().to_string(),
            path: path.into(),
            message,
            timestamp: now_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthEnvelope {
    pub status: String,
    pub timestamp: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl HealthEnvelope {
    pub fn new(status: impl Into<String>, details: Map<String, Value>) -> Self {
        Self {
            status: status.into(),
            timestamp: now_rfc3339(),
            details,
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Serialize `body` as JSON with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Build a fresh error response carrying an `ErrorEnvelope`.
pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    path: &str,
    message: Option<String>,
) -> Response {
    json_response(status, &ErrorEnvelope::new(kind, path, message))
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn error_response_has_envelope_and_content_type() {
        let response = error_response(StatusCode::NOT_FOUND, ErrorKind::NotFound, "/nope", None);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            JSON_CONTENT_TYPE
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(raw.get("message").is_none());

        let envelope: ErrorEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.error, "not_found");
        assert_eq!(envelope.path, "/nope");
        assert!(chrono::DateTime::parse_from_rfc3339(&envelope.timestamp).is_ok());
    }

    #[test]
    fn message_is_serialized_when_present() {
        let envelope = ErrorEnvelope::new(
            ErrorKind::RateLimitExceeded,
            "/metrics",
            Some("slow down".to_string()),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"], "rate_limit_exceeded");
        assert_eq!(json["message"], "slow down");
    }
}
