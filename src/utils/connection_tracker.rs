//! Connection tracking for diagnostics and the active-connection gauge.
//!
//! Each accepted TCP connection is registered with a lightweight record
//! holding its peer address, age and in-flight request count. Registration
//! and request accounting are RAII guards so a connection task that unwinds
//! or is dropped mid-request still leaves the tracker consistent.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use scc::HashMap;
use serde::Serialize;

/// Unique identifier for a connection
pub type ConnectionId = u64;

/// Information about an open connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub established_at: Instant,
    pub active_requests: AtomicU64,
}

impl ConnectionInfo {
    pub fn new(id: ConnectionId, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            established_at: Instant::now(),
            active_requests: AtomicU64::new(0),
        }
    }

    pub fn active_request_count(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self) -> bool {
        self.active_request_count() == 0
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    /// Count a request as in flight until the returned guard is dropped.
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        RequestGuard { info: self.clone() }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id,
            remote_addr: self.remote_addr.to_string(),
            age_secs: self.age().as_secs_f64(),
            active_requests: self.active_request_count(),
        }
    }
}

/// Decrements the connection's in-flight count on drop.
#[derive(Debug)]
pub struct RequestGuard {
    info: Arc<ConnectionInfo>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.info.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Unregisters the connection on drop.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    info: Arc<ConnectionInfo>,
}

impl ConnectionGuard {
    pub fn info(&self) -> &Arc<ConnectionInfo> {
        &self.info
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.unregister_connection(self.info.id);
    }
}

/// Registry of open connections.
#[derive(Clone)]
pub struct ConnectionTracker {
    connections: Arc<HashMap<ConnectionId, Arc<ConnectionInfo>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(HashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new connection; it stays registered until the guard drops.
    pub fn register_connection(&self, remote_addr: SocketAddr) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = Arc::new(ConnectionInfo::new(id, remote_addr));

        let _ = self.connections.insert(id, info.clone());
        crate::metrics::set_active_connections(self.connections.len());

        tracing::debug!(
            connection.id = id,
            %remote_addr,
            total_connections = self.connections.len(),
            "connection registered"
        );

        ConnectionGuard {
            tracker: self.clone(),
            info,
        }
    }

    /// Remove (unregister) a connection by id.
    pub fn unregister_connection(&self, connection_id: ConnectionId) {
        if let Some((_, info)) = self.connections.remove(&connection_id) {
            crate::metrics::set_active_connections(self.connections.len());
            tracing::debug!(
                connection.id = connection_id,
                age = ?info.age(),
                total_connections = self.connections.len(),
                "connection unregistered"
            );
        }
    }

    /// Current number of registered connections.
    pub fn active_connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sum of in-flight requests across all connections.
    pub fn total_active_requests(&self) -> u64 {
        let mut total = 0;
        self.connections.scan(|_, info| {
            total += info.active_request_count();
        });
        total
    }

    /// Snapshot of every open connection, oldest first.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let mut connections = Vec::new();
        self.connections.scan(|_, info| {
            connections.push(info.snapshot());
        });
        connections.sort_by_key(|c| c.id);
        connections
    }

    /// Aggregate snapshot statistics.
    pub fn get_stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats::default();
        let mut oldest = Duration::ZERO;

        self.connections.scan(|_, info| {
            stats.total_connections += 1;
            stats.total_active_requests += info.active_request_count();
            if info.is_idle() {
                stats.idle_connections += 1;
            }
            oldest = oldest.max(info.age());
        });

        stats.active_connections = stats.total_connections - stats.idle_connections;
        stats.oldest_connection_age_secs = oldest.as_secs_f64();
        stats
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about current connections
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_active_requests: u64,
    pub oldest_connection_age_secs: f64,
}

/// Serializable view of a single connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub remote_addr: String,
    pub age_secs: f64,
    pub active_requests: u64,
}
