use async_trait::async_trait;
use thiserror::Error;

use crate::ports::request_context::RequestContext;

/// Failure reported by a metrics or health collaborator.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SourceError {
    /// The backing store could not produce a result
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The request context was cancelled before a result was produced
    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// MetricsSource defines the port for rendering the exposition payload
#[async_trait]
pub trait MetricsSource: Send + Sync + 'static {
    /// Render the current metrics in Prometheus text format
    ///
    /// # Arguments
    /// * `ctx` - Request id, deadline and cancellation for this call
    ///
    /// # Returns
    /// The exposition text. An empty string is a valid, empty payload.
    async fn render(&self, ctx: &RequestContext) -> Result<String, SourceError>;
}
