//! Beacon - a hardened HTTP runtime for metrics exposition endpoints.
//!
//! Beacon accepts connections, serves a small fixed set of routes
//! (`/health`, `/metrics` and optional `/debug/*` diagnostics), protects itself
//! against abusive or malformed traffic, and shuts down without dropping
//! in-flight work. What "healthy" means and what the metrics payload contains
//! are decided by two collaborators plugged in through async traits.
//!
//! # Features
//! - Start/stop lifecycle with a single running instance per server value
//! - Bounded graceful shutdown that cancels collaborators once the deadline passes
//! - Panic isolation: a panicking handler yields a `500` envelope, never a dead connection
//! - Structured access logs via `tracing`
//! - Optional credentialed CORS with origin reflection
//! - Optional per-client fixed-window rate limiting with `X-RateLimit-*` headers
//! - Uniform JSON error envelopes
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use beacon::{PrometheusSource, ProcessHealth, Server, config::ServerConfig};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = ServerConfig::builder().host("127.0.0.1").port(9100).build();
//! let metrics = Arc::new(PrometheusSource::install()?);
//! let health = Arc::new(ProcessHealth::new(config.mode));
//! let server = Arc::new(Server::new(config, metrics, health)?);
//!
//! let running = tokio::spawn({
//!     let server = server.clone();
//!     async move { server.start().await }
//! });
//! // ... later
//! server.stop(None).await?;
//! running.await??;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **Ports** (traits and their data types) are kept apart from **adapters**
//! (implementations); request-independent logic such as the rate limiter and
//! the response envelopes lives in `core`.
//!
//! # Error Handling
//! Library operations return domain error types (`ServerError`,
//! `ValidationError`, `SourceError`). Configuration loading and the binary use
//! `eyre::Result` with context attached through `WrapErr`.
//!
//! # Concurrency & Data Structures
//! The lifecycle state and the rate limiter map each sit behind their own
//! mutex, held only for the critical section. Open connections are tracked in
//! an `scc::HashMap`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{Pipeline, ProcessHealth, PrometheusSource, Server, Stage},
    core::{ErrorEnvelope, FixedWindowLimiter, HealthEnvelope},
    ports::{
        HealthReport, HealthSource, HttpServer, LifecycleState, MetricsSource, RequestContext,
        ServerError, SourceError,
    },
    utils::{ConnectionTracker, GracefulShutdown},
};
