//! Default `MetricsSource` backed by the Prometheus recorder.
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ports::{MetricsSource, RequestContext, SourceError};

/// Renders everything recorded through the `metrics` facade.
#[derive(Clone)]
pub struct PrometheusSource {
    handle: PrometheusHandle,
}

impl PrometheusSource {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Install the Prometheus recorder as the process-global `metrics`
    /// recorder. Can succeed only once per process.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .wrap_err("Failed to install Prometheus recorder")?;
        Ok(Self::new(handle))
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn render(&self, ctx: &RequestContext) -> Result<String, SourceError> {
        if ctx.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        self.handle.run_upkeep();
        Ok(self.handle.render())
    }
}
