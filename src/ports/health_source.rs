use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ports::request_context::RequestContext;

/// Result of a health determination.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub status: String,
    pub details: Map<String, Value>,
}

impl HealthReport {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Only `"ok"` and `"healthy"` count as healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy")
    }
}

/// HealthSource defines the port for deciding whether the service is healthy
#[async_trait]
pub trait HealthSource: Send + Sync + 'static {
    async fn check(&self, ctx: &RequestContext) -> HealthReport;
}
