use std::{fmt, io, time::Duration};

use thiserror::Error;

use crate::config::ValidationError;

/// Lifecycle of a server value. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::NotStarted => write!(f, "not_started"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Error type for server construction and lifecycle operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// The configuration failed validation
    #[error("Invalid server configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotStarted,

    /// A stopped server cannot be started again
    #[error("Server has already been stopped")]
    AlreadyStopped,

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Unrecoverable listener failure after a successful bind
    #[error("Listener error: {0}")]
    Listener(#[source] io::Error),

    /// In-flight requests were still running when the deadline passed
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// HttpServer defines the port (interface) for the server lifecycle
pub trait HttpServer: Send + Sync + 'static {
    /// Bind and serve until the listener is closed
    ///
    /// # Returns
    /// A future that resolves with `Ok(())` after a graceful shutdown, or an
    /// error if binding or accepting failed
    fn start(&self) -> impl std::future::Future<Output = Result<(), ServerError>> + Send;

    /// Stop accepting and wait up to `deadline` for in-flight requests
    ///
    /// # Arguments
    /// * `deadline` - How long to wait; `None` uses the configured shutdown timeout
    fn stop(
        &self,
        deadline: Option<Duration>,
    ) -> impl std::future::Future<Output = Result<(), ServerError>> + Send;

    fn state(&self) -> LifecycleState;
}
