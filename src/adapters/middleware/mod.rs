//! Request pipeline stages.
//!
//! Each stage is a plain Axum `from_fn` middleware so it can be attached to a
//! `Router` independently; [`Pipeline`](crate::adapters::pipeline::Pipeline)
//! decides which ones run and in what order.
pub mod access_log;
pub mod cors;
pub mod decorations;
pub mod rate_limit;
pub mod recovery;

pub use access_log::access_log_middleware;
pub use cors::cors_middleware;
pub use decorations::ResponseDecorations;
pub use rate_limit::rate_limit_middleware;
pub use recovery::{RecoveredPanic, catch_panic_layer, install_panic_hook, recovery_middleware};
