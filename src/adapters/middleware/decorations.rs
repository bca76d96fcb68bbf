//! Headers that must survive a response being replaced.
//!
//! The CORS and rate-limit stages decorate the response on its way out. When
//! a handler panics, or the write timeout fires, that response never exists
//! and a fresh envelope is built further out. Both stages therefore also
//! record what they would have added in a [`ResponseDecorations`] slot
//! carried in the request extensions, and whoever builds the replacement
//! applies it.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::{HeaderMap, HeaderValue, Request};

use crate::{
    adapters::middleware::{cors::set_response_headers, rate_limit::set_rate_limit_headers},
    core::RateLimitDecision,
};

#[derive(Debug, Default)]
struct Recorded {
    origin: Option<HeaderValue>,
    rate_limit: Option<RateLimitDecision>,
}

/// Shared, per-request record of outgoing CORS and rate-limit headers.
#[derive(Debug, Clone, Default)]
pub struct ResponseDecorations(Arc<Mutex<Recorded>>);

impl ResponseDecorations {
    /// The slot already carried by `req`, or a new one attached to it.
    pub fn attach<B>(req: &mut Request<B>) -> Self {
        req.extensions_mut().get_or_insert_default::<Self>().clone()
    }

    /// Record on the slot carried by `req`, if any.
    pub fn record_on<B>(req: &Request<B>, f: impl FnOnce(&Self)) {
        if let Some(decorations) = req.extensions().get::<Self>() {
            f(decorations);
        }
    }

    pub fn record_origin(&self, origin: HeaderValue) {
        self.lock().origin = Some(origin);
    }

    pub fn record_rate_limit(&self, decision: RateLimitDecision) {
        self.lock().rate_limit = Some(decision);
    }

    /// Add the recorded headers to a replacement response. Existing values
    /// are overwritten, never duplicated.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let (origin, rate_limit) = {
            let recorded = self.lock();
            (recorded.origin.clone(), recorded.rate_limit)
        };
        if let Some(origin) = origin {
            set_response_headers(headers, origin);
        }
        if let Some(decision) = rate_limit {
            set_rate_limit_headers(headers, &decision);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
