pub mod client_identity;
pub mod envelope;
pub mod rate_limiter;

pub use client_identity::client_identity;
pub use envelope::{ErrorEnvelope, ErrorKind, HealthEnvelope, error_response};
pub use rate_limiter::{FixedWindowLimiter, RateLimitDecision};
