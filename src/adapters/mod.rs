pub mod health;
pub mod http_handler;
pub mod http_server;
pub mod middleware;
pub mod pipeline;
pub mod prometheus;

/// Re-export commonly used types from adapters
pub use health::ProcessHealth;
pub use http_handler::AppState;
pub use http_server::Server;
pub use pipeline::{Pipeline, Stage};
pub use prometheus::PrometheusSource;
