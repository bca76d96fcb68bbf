use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Per-request information handed to collaborators.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Value of the inbound `X-Request-ID` header, if supplied.
    pub request_id: Option<String>,
    /// Instant by which the response must be produced.
    pub deadline: Instant,
    /// Cancelled when the server abandons in-flight work during shutdown.
    pub cancellation: CancellationToken,
}

/// `now + budget`, or roughly a century out when that is not representable.
fn deadline_after(budget: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

impl RequestContext {
    pub fn new(request_id: Option<String>, budget: Duration, cancellation: CancellationToken) -> Self {
        Self {
            request_id,
            deadline: deadline_after(budget),
            cancellation,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
