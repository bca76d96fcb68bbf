use std::time::Instant;

use async_trait::async_trait;

use crate::{
    config::models::Mode,
    ports::{HealthReport, HealthSource, RequestContext},
};

/// Default `HealthSource`: the process is healthy while it can answer.
#[derive(Debug, Clone)]
pub struct ProcessHealth {
    mode: Mode,
    started_at: Instant,
}

impl ProcessHealth {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl HealthSource for ProcessHealth {
    async fn check(&self, _ctx: &RequestContext) -> HealthReport {
        HealthReport::new("ok")
            .with_detail("version", env!("CARGO_PKG_VERSION"))
            .with_detail("mode", self.mode.to_string())
            .with_detail("uptime_secs", self.started_at.elapsed().as_secs())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn reports_ok_with_details() {
        let health = ProcessHealth::new(Mode::Test);
        let ctx = RequestContext::new(None, Duration::from_secs(1), CancellationToken::new());
        let report = health.check(&ctx).await;
        assert!(report.is_healthy());
        assert_eq!(report.details["mode"], "test");
        assert!(report.details.contains_key("uptime_secs"));
    }
}
