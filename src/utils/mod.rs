pub mod connection_tracker;
pub mod graceful_shutdown;

pub use connection_tracker::{ConnectionGuard, ConnectionInfo, ConnectionStats, ConnectionTracker};
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
