//! Lifecycle manager: owns the listening socket and the start/stop state
//! machine.
//!
//! `start` (or `serve` on a pre-bound listener) runs the accept loop until
//! `stop` cancels it. Stopping closes the listener at once, asks every open
//! connection to finish its in-flight requests, and waits for them up to a
//! deadline. If the deadline passes, the remaining connections are abandoned
//! and the cancellation token handed to collaborators fires.
use std::{
    convert::Infallible,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use axum::{Router, body::Body, extract::ConnectInfo, response::Response};
use http::StatusCode;
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::{conn::auto, graceful::GracefulShutdown},
};
use tokio::{
    net::TcpListener,
    sync::watch,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::{
    adapters::{
        http_handler::{AppState, router},
        middleware::ResponseDecorations,
        pipeline::Pipeline,
    },
    config::{ServerConfigValidator, models::ServerConfig},
    core::{ErrorKind, FixedWindowLimiter, error_response},
    ports::{HealthSource, HttpServer, LifecycleState, MetricsSource, ServerError},
    utils::{ConnectionTracker, connection_tracker::ConnectionInfo},
};

/// Consecutive non-connection accept failures tolerated before the listener
/// is considered broken.
const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 16;

/// How long cancelled requests get to finish before their connections are
/// aborted.
const ABANDON_GRACE: Duration = Duration::from_millis(500);

/// The metrics exposition server.
pub struct Server {
    config: Arc<ServerConfig>,
    app: Router,
    limiter: Arc<FixedWindowLimiter>,
    connections: ConnectionTracker,
    state: Mutex<LifecycleState>,
    shutdown: CancellationToken,
    abandon: CancellationToken,
    finished: watch::Sender<bool>,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl Server {
    /// Validate `config` and assemble the pipeline. The server owns a fresh
    /// rate limiter sized from `config.rate_limit`.
    pub fn new(
        config: ServerConfig,
        metrics: Arc<dyn MetricsSource>,
        health: Arc<dyn HealthSource>,
    ) -> Result<Self, ServerError> {
        let limiter = Arc::new(FixedWindowLimiter::from_settings(&config.rate_limit));
        Self::with_rate_limiter(config, metrics, health, limiter)
    }

    /// Like [`new`](Self::new) with an injected limiter.
    pub fn with_rate_limiter(
        config: ServerConfig,
        metrics: Arc<dyn MetricsSource>,
        health: Arc<dyn HealthSource>,
        limiter: Arc<FixedWindowLimiter>,
    ) -> Result<Self, ServerError> {
        ServerConfigValidator::validate(&config)?;

        let config = Arc::new(config);
        let connections = ConnectionTracker::new();
        let abandon = CancellationToken::new();

        let state = AppState {
            config: config.clone(),
            metrics,
            health,
            limiter: limiter.clone(),
            connections: connections.clone(),
            abandon: abandon.clone(),
            started_at: Instant::now(),
        };
        let pipeline = Pipeline::from_config(&config, limiter.clone());
        tracing::debug!(stages = ?pipeline.stages(), "request pipeline assembled");
        let app = pipeline.apply(router(state));

        Ok(Self {
            config,
            app,
            limiter,
            connections,
            state: Mutex::new(LifecycleState::NotStarted),
            shutdown: CancellationToken::new(),
            abandon,
            finished: watch::Sender::new(false),
            bound: watch::Sender::new(None),
        })
    }

    /// The fully assembled request pipeline.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.limiter
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Resolve once the listener is bound. `None` if the server finished
    /// without ever binding.
    pub async fn wait_until_bound(&self) -> Option<SocketAddr> {
        let mut bound = self.bound.subscribe();
        let mut finished = self.finished.subscribe();
        tokio::select! {
            addr = bound.wait_for(Option::is_some) => addr.ok().and_then(|addr| *addr),
            _ = finished.wait_for(|done| *done) => *self.bound.borrow(),
        }
    }

    /// Bind the configured address and serve until stopped.
    ///
    /// Resolves with `Ok(())` once the listener has closed after a `stop`.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.reserve()?;

        let address = self.config.listen_addr();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                self.release_after_failure();
                tracing::error!(%address, error = %source, "failed to start");
                return Err(ServerError::Bind { address, source });
            }
        };

        self.run(listener).await
    }

    /// Serve on an already bound listener until stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.reserve()?;
        self.run(listener).await
    }

    /// Stop accepting and wait up to `deadline` (default: the configured
    /// shutdown timeout) for in-flight requests.
    pub async fn stop(&self, deadline: Option<Duration>) -> Result<(), ServerError> {
        {
            let state = self.lock_state();
            if *state != LifecycleState::Running || self.shutdown.is_cancelled() {
                return Err(ServerError::NotStarted);
            }
            self.shutdown.cancel();
        }

        let deadline = deadline.unwrap_or_else(|| self.config.shutdown_timeout());
        let mut finished = self.finished.subscribe();
        let drained = tokio::time::timeout(deadline, finished.wait_for(|done| *done))
            .await
            .is_ok();

        if drained {
            *self.lock_state() = LifecycleState::Stopped;
            tracing::info!("stopped gracefully");
            return Ok(());
        }

        self.abandon.cancel();
        *self.lock_state() = LifecycleState::Stopped;
        tracing::warn!(
            ?deadline,
            active_requests = self.connections.total_active_requests(),
            "shutdown timeout"
        );
        Err(ServerError::ShutdownTimeout(deadline))
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the `Running` state before binding so concurrent starts observe
    /// it and fail without side effects.
    fn reserve(&self) -> Result<(), ServerError> {
        let mut state = self.lock_state();
        match *state {
            LifecycleState::Running => Err(ServerError::AlreadyRunning),
            LifecycleState::Stopped => Err(ServerError::AlreadyStopped),
            LifecycleState::NotStarted => {
                *state = LifecycleState::Running;
                self.finished.send_replace(false);
                Ok(())
            }
        }
    }

    fn release_after_failure(&self) {
        let mut state = self.lock_state();
        *state = if self.shutdown.is_cancelled() {
            LifecycleState::Stopped
        } else {
            LifecycleState::NotStarted
        };
        self.finished.send_replace(true);
    }

    fn connection_builder(&self) -> auto::Builder<TokioExecutor> {
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.read_timeout())
            .keep_alive(true);
        builder
            .http2()
            .timer(TokioTimer::new())
            .keep_alive_interval(self.config.idle_timeout());
        builder
    }

    /// Periodically drop expired rate-limit buckets while serving.
    fn spawn_bucket_sweeper(&self) -> Option<JoinHandle<()>> {
        if !self.config.enable_rate_limit {
            return None;
        }

        let limiter = self.limiter.clone();
        let every = self.config.rate_limit.cleanup_every();
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            loop {
                // `sleep` saturates at the far future where `interval` would overflow
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(every) => {
                        let removed = limiter.sweep_expired();
                        let tracked = limiter.tracked_clients();
                        crate::metrics::set_rate_limiter_clients(tracked);
                        tracing::debug!(removed, tracked, "swept expired rate limit buckets");
                    }
                }
            }
        }))
    }

    async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.release_after_failure();
                tracing::error!(error = %e, "failed to start");
                return Err(ServerError::Listener(e));
            }
        };
        self.bound.send_replace(Some(local_addr));
        tracing::info!(
            address = %local_addr,
            mode = %self.config.mode,
            cors = self.config.enable_cors,
            rate_limit = self.config.enable_rate_limit,
            diagnostics = self.config.enable_diagnostics,
            "starting"
        );

        let sweeper = self.spawn_bucket_sweeper();
        let builder = self.connection_builder();
        let graceful = GracefulShutdown::new();
        let mut tasks = JoinSet::new();
        let mut accept_failures = 0u32;
        let write_timeout = self.config.write_timeout();

        let outcome: Result<(), io::Error> = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => {
                            accept_failures = 0;
                            accepted
                        }
                        Err(e) if is_connection_error(&e) => {
                            tracing::debug!(error = %e, "connection failed during accept");
                            continue;
                        }
                        Err(e) => {
                            accept_failures += 1;
                            if accept_failures >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                                break Err(e);
                            }
                            let backoff = Duration::from_millis(10 << accept_failures.min(7));
                            tracing::error!(error = %e, ?backoff, "accept failed, backing off");
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                    };

                    let guard = self.connections.register_connection(remote_addr);
                    let app = self.app.clone();
                    let info = guard.info().clone();
                    let service = service_fn(move |req: http::Request<Incoming>| {
                        handle_request(app.clone(), info.clone(), remote_addr, write_timeout, req)
                    });

                    let connection = graceful.watch(
                        builder
                            .serve_connection(TokioIo::new(stream), service)
                            .into_owned(),
                    );
                    tasks.spawn(async move {
                        if let Err(e) = connection.await {
                            tracing::debug!(%remote_addr, error = %e, "connection closed with error");
                        }
                        drop(guard);
                    });
                }
            }
        };

        drop(listener);
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        tracing::debug!(open_connections = tasks.len(), "listener closed, draining");
        let drain = graceful.shutdown();
        tokio::pin!(drain);
        tokio::select! {
            _ = &mut drain => {
                tracing::debug!("all connections drained");
            }
            _ = self.abandon.cancelled() => {
                // collaborators see the cancellation first and may still answer
                if tokio::time::timeout(ABANDON_GRACE, &mut drain).await.is_err() {
                    tracing::warn!(open_connections = tasks.len(), "abandoning in-flight connections");
                    tasks.abort_all();
                }
            }
        }
        while tasks.join_next().await.is_some() {}
        self.bound.send_replace(None);

        match outcome {
            Ok(()) => {
                self.finished.send_replace(true);
                Ok(())
            }
            Err(e) => {
                *self.lock_state() = LifecycleState::Stopped;
                self.finished.send_replace(true);
                tracing::error!(error = %e, "failed to start");
                Err(ServerError::Listener(e))
            }
        }
    }
}

/// Serve one request through the pipeline, bounded by the write timeout.
async fn handle_request(
    app: Router,
    info: Arc<ConnectionInfo>,
    remote_addr: SocketAddr,
    write_timeout: Duration,
    mut req: http::Request<Incoming>,
) -> Result<Response, Infallible> {
    let _in_flight = info.begin_request();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ConnectInfo(remote_addr));
    let decorations = ResponseDecorations::attach(&mut req);

    match tokio::time::timeout(write_timeout, app.oneshot(req.map(Body::new))).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(%path, %remote_addr, ?write_timeout, "request exceeded write timeout");
            let mut response = error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Timeout,
                &path,
                None,
            );
            decorations.apply(response.headers_mut());
            Ok(response)
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

impl HttpServer for Server {
    fn start(&self) -> impl std::future::Future<Output = Result<(), ServerError>> + Send {
        Server::start(self)
    }

    fn stop(
        &self,
        deadline: Option<Duration>,
    ) -> impl std::future::Future<Output = Result<(), ServerError>> + Send {
        Server::stop(self, deadline)
    }

    fn state(&self) -> LifecycleState {
        Server::state(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::{adapters::http_handler::tests::state, config::ValidationError};

    use super::*;

    fn server(config: ServerConfig) -> Server {
        let app_state = state(config.clone(), Ok("up 1\n"), "ok");
        Server::new(config, app_state.metrics, app_state.health).unwrap()
    }

    fn local_config() -> ServerConfig {
        ServerConfig::builder().host("127.0.0.1").port(1).build()
    }

    #[test]
    fn invalid_config_fails_construction() {
        let bad = ServerConfig::builder().port(0).build();
        let app_state = state(bad.clone(), Ok(""), "ok");
        let result = Server::new(bad, app_state.metrics, app_state.health);
        assert!(matches!(
            result,
            Err(ServerError::InvalidConfig(ValidationError::ValidationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn stop_before_start_is_not_started() {
        let server = server(local_config());
        assert!(matches!(server.stop(None).await, Err(ServerError::NotStarted)));
        assert_eq!(server.state(), LifecycleState::NotStarted);
        assert_eq!(server.local_addr(), None);
    }

    #[tokio::test]
    async fn serve_stop_cycle() {
        let server = Arc::new(server(local_config()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let expected = listener.local_addr().unwrap();

        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        assert_eq!(server.wait_until_bound().await, Some(expected));
        assert_eq!(server.state(), LifecycleState::Running);

        let again = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(server.serve(again).await, Err(ServerError::AlreadyRunning)));

        server.stop(Some(Duration::from_secs(5))).await.unwrap();
        assert!(running.await.unwrap().is_ok());
        assert_eq!(server.state(), LifecycleState::Stopped);

        assert!(matches!(server.stop(None).await, Err(ServerError::NotStarted)));
        assert!(matches!(server.start().await, Err(ServerError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn bind_failure_leaves_server_startable() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let server = server(ServerConfig::builder().host("127.0.0.1").port(port).build());
        assert!(matches!(server.start().await, Err(ServerError::Bind { .. })));
        assert_eq!(server.state(), LifecycleState::NotStarted);
        assert_eq!(server.wait_until_bound().await, None);
    }

    #[tokio::test]
    async fn expired_buckets_are_swept_while_serving() {
        let mut config = ServerConfig::builder()
            .host("127.0.0.1")
            .port(1)
            .rate_limit(true)
            .rate_limit_quota(5, "100ms")
            .build();
        config.rate_limit.cleanup_interval = "50ms".to_string();
        let server = Arc::new(server(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };
        server.wait_until_bound().await.unwrap();

        server.rate_limiter().check("198.51.100.1");
        server.rate_limiter().check("198.51.100.2");
        assert_eq!(server.rate_limiter().tracked_clients(), 2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while server.rate_limiter().tracked_clients() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("buckets were never swept");

        server.stop(None).await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[test]
    fn connection_errors_are_not_fatal() {
        assert!(is_connection_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_connection_error(&io::Error::other("too many open files")));
    }
}
