//! Panic-catch, tracing-span, and request-logging middleware (§4.8), applied
//! in that order ahead of authentication. Grounded on the layer ordering and
//! responsibilities described by the teacher's `r2e_core` tracing/layers
//! module, built directly against `tower-http` rather than through the
//! teacher's `AppBuilder` layer-registration system.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use http_body_util::Full;
use std::net::SocketAddr;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

/// In-process panic counter. Not exported as a metric (metrics are out of
/// scope); surfaced only through a future health indicator if one is wired
/// up to watch it.
#[derive(Default)]
pub struct PanicCounter(AtomicU64);

impl PanicCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Builds a `CatchPanicLayer` that recovers from a panicking handler,
/// increments `counter`, and returns a generic 500 — deliberately not
/// logging the panic payload itself here, since `std::panic::catch_unwind`
/// already ran past the point where `tracing`'s panic hook would have fired.
pub fn catch_panic_layer(
    counter: Arc<PanicCounter>,
) -> CatchPanicLayer<impl Fn(Box<dyn std::any::Any + Send>) -> Response<Full<Bytes>> + Clone> {
    CatchPanicLayer::custom(move |_panic_payload: Box<dyn std::any::Any + Send>| {
        counter.increment();
        Response::builder()
            .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::new()))
            .expect("static response always builds")
    })
}

/// `tower_http::trace::TraceLayer` configured to open one span per incoming
/// request, named the same way across both the HTTP and gRPC fronts.
pub fn tracing_span_layer<B>() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    impl Fn(&Request<B>) -> Span + Clone,
> {
    TraceLayer::new_for_http().make_span_with(|req: &Request<B>| {
        tracing::info_span!(
            "incoming HTTP request",
            method = %req.method(),
            path = %req.uri().path(),
        )
    })
}

/// Request-logging middleware: remote address, method, path, user agent, and
/// duration at `info` level, once the response has been produced.
pub async fn log_requests(req: Request<axum::body::Body>, next: axum::middleware::Next) -> Response<axum::body::Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string())
        .unwrap_or_else(|| "-".to_string());

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed();

    tracing::info!(
        remote_addr = %remote_addr,
        method = %method,
        path = %path,
        user_agent = %user_agent,
        status = response.status().as_u16(),
        duration_ms = duration_ms(elapsed),
        "handled request"
    );

    response
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
