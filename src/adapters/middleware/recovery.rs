//! Panic isolation for the request pipeline.
//!
//! Two pieces cooperate. `CatchPanicLayer` (from `tower-http`) sits directly
//! inside the recovery middleware and turns an unwinding handler into a
//! plain 500 response carrying a [`RecoveredPanic`] extension. The
//! [`recovery_middleware`] function around it owns the request metadata: it
//! logs the panic with method, path and client, counts it, and replaces the
//! response with a freshly built `ErrorEnvelope`, re-applying the CORS and
//! rate-limit headers recorded in the request's [`ResponseDecorations`].
//!
//! Backtraces are captured by a process-wide panic hook into a thread-local
//! slot; the catch happens on the thread that panicked, so the responder can
//! pick the backtrace up from there.
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    net::SocketAddr,
    panic,
    sync::Once,
};

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use http::StatusCode;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::Instrument;

use crate::{
    adapters::middleware::decorations::ResponseDecorations,
    core::{ErrorKind, client_identity, error_response},
    tracing_setup::request_span,
};

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install a panic hook that records a backtrace for the recovery stage and
/// then defers to the previously installed hook. Idempotent.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

/// Details of a contained panic, attached to the placeholder response.
#[derive(Debug, Clone)]
pub struct RecoveredPanic {
    pub message: String,
    pub backtrace: Option<String>,
}

/// Render a panic payload as text.
pub fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    if let Some(e) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        return e.to_string();
    }
    if let Some(e) = payload.downcast_ref::<std::io::Error>() {
        return e.to_string();
    }
    macro_rules! integer {
        ($($t:ty),*) => {
            $(if let Some(n) = payload.downcast_ref::<$t>() {
                return n.to_string();
            })*
        };
    }
    integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
    if payload.downcast_ref::<()>().is_some() {
        return "()".to_string();
    }
    "panic payload of unknown type".to_string()
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let recovered = RecoveredPanic {
        message: describe_panic(payload.as_ref()),
        backtrace: LAST_BACKTRACE.with(|slot| slot.borrow_mut().take()),
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.extensions_mut().insert(recovered);
    response
}

/// The inner half of the recovery stage.
pub fn catch_panic_layer() -> CatchPanicLayer<fn(Box<dyn Any + Send + 'static>) -> Response<Body>> {
    CatchPanicLayer::custom(panic_response as fn(Box<dyn Any + Send + 'static>) -> Response<Body>)
}

/// Outer half of the recovery stage: request span, panic logging and the
/// replacement 500 envelope.
pub async fn recovery_middleware(mut req: Request, next: Next) -> Response {
    let decorations = ResponseDecorations::attach(&mut req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_identity(req.headers(), peer);
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let span = request_span(method.as_str(), &path, request_id.as_deref());
    let response = next.run(req).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());

    let Some(recovered) = response.extensions().get::<RecoveredPanic>() else {
        return response;
    };

    span.in_scope(|| {
        tracing::error!(
            panic = %recovered.message,
            backtrace = recovered.backtrace.as_deref().unwrap_or("<unavailable>"),
            method = %method,
            path = %path,
            client = %client,
            "recovered from panic"
        );
    });
    crate::metrics::increment_panics_recovered(&route);

    let mut response = error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::InternalServerError,
        &path,
        None,
    );
    decorations.apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn describes_common_payloads() {
        let cases: Vec<(Box<dyn Any + Send>, &str)> = vec![
            (Box::new("static str"), "static str"),
            (Box::new(String::from("owned")), "owned"),
            (Box::new(io::Error::other("disk on fire")), "disk on fire"),
            (Box::new(42_i32), "42"),
            (Box::new(7_u64), "7"),
            (Box::new(()), "()"),
        ];
        for (payload, expected) in cases {
            assert_eq!(describe_panic(payload.as_ref()), expected);
        }
    }

    #[test]
    fn unknown_payloads_still_describe() {
        struct Opaque;
        let payload: Box<dyn Any + Send> = Box::new(Opaque);
        assert_eq!(describe_panic(payload.as_ref()), "panic payload of unknown type");
    }

    #[test]
    fn panic_response_carries_extension() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let recovered = response.extensions().get::<RecoveredPanic>().unwrap();
        assert_eq!(recovered.message, "boom");
    }
}
