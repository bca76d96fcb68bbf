pub mod health_source;
pub mod http_server;
pub mod metrics_source;
pub mod request_context;

pub use health_source::{HealthReport, HealthSource};
pub use http_server::{HttpServer, LifecycleState, ServerError};
pub use metrics_source::{MetricsSource, SourceError};
pub use request_context::RequestContext;
