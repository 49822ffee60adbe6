//! Router construction with the standard middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id in and out, RequestId extension
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Real IP       │ ← ClientIp extension
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Panic Recovery   │ ← 500 internal_error envelope
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Options, in the  │ ← timeout, CORS, compression, heartbeat, slashes, custom
//! │ order given      │
//! └────────┬─────────┘
//!          ▼
//!       Handler
//! ```
//!
//! Layers in axum wrap the routes that exist when they are applied, so
//! [`build_router`] takes the routes up front. Routes merged into the
//! returned router afterwards bypass the stack.

use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::Route;
use tower::{Layer, Service};
use tower_http::CompressionLevel;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::error;

use super::real_ip::RealIpLayer;
use super::request_id::{RequestId, RequestIdLayer};
use super::request_logger::{RequestLoggerLayer, RequestLoggerOptions};
use super::response::internal_error;
use crate::logger::Logger;

/// CORS preflight cache lifetime.
const CORS_MAX_AGE: Duration = Duration::from_secs(300);

/// A deferred change to the router under construction.
///
/// Options are applied once, in order, by [`build_router`].
pub struct RouterOption(Box<dyn FnOnce(Router) -> Router + Send>);

impl RouterOption {
    /// Wrap an arbitrary router transformation.
    pub fn new(apply: impl FnOnce(Router) -> Router + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    fn apply(self, router: Router) -> Router {
        (self.0)(router)
    }
}

/// Wrap `routes` with request ID, real IP and panic recovery, then `options`.
///
/// Earlier options wrap later ones, so an option listed first sees the
/// request before the options after it.
pub fn build_router(routes: Router, options: impl IntoIterator<Item = RouterOption>) -> Router {
    let options: Vec<RouterOption> = options.into_iter().collect();

    // `Router::layer` makes the newest layer the outermost, so apply innermost first.
    let router = options
        .into_iter()
        .rev()
        .fold(routes, |router, option| option.apply(router));

    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(RealIpLayer::new())
        .layer(RequestIdLayer::new())
}

/// Abort requests that run longer than `timeout` with 504 Gateway Timeout.
pub fn with_timeout(timeout: Duration) -> RouterOption {
    RouterOption::new(move |router| {
        router.layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            timeout,
        ))
    })
}

/// CORS with credentials allowed and a 5 minute preflight cache.
///
/// An origin of `"*"` allows any origin by mirroring the request's `Origin`,
/// since a literal wildcard cannot be combined with credentials.
pub fn with_cors<O, M, H>(origins: O, methods: M, headers: H) -> RouterOption
where
    O: IntoIterator,
    O::Item: AsRef<str>,
    M: IntoIterator,
    M::Item: AsRef<str>,
    H: IntoIterator,
    H::Item: AsRef<str>,
{
    let origins: Vec<String> = origins.into_iter().map(|o| o.as_ref().to_string()).collect();
    let methods: Vec<String> = methods.into_iter().map(|m| m.as_ref().to_string()).collect();
    let headers: Vec<String> = headers.into_iter().map(|h| h.as_ref().to_string()).collect();

    let cors = build_cors_layer(&origins, &methods, &headers);
    RouterOption::new(move |router| router.layer(cors))
}

/// Permissive CORS: any origin, the common methods and headers.
pub fn with_cors_defaults() -> RouterOption {
    with_cors(
        ["*"],
        ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"],
        ["Accept", "Authorization", "Content-Type", "X-Request-ID"],
    )
}

/// Compress response bodies (gzip, br, deflate, zstd) at the given quality level.
pub fn with_compression(level: i32) -> RouterOption {
    RouterOption::new(move |router| {
        router.layer(CompressionLayer::new().quality(CompressionLevel::Precise(level)))
    })
}

/// Answer `GET`/`HEAD` on `path` with `200 "."` before routing.
///
/// Load balancers can probe this without hitting any handler.
pub fn with_heartbeat(path: impl Into<String>) -> RouterOption {
    let path: Arc<str> = Arc::from(path.into());
    RouterOption::new(move |router| {
        router.layer(middleware::from_fn_with_state(path, heartbeat))
    })
}

/// Drop trailing slashes before routing, so `/orders/1/` reaches `/orders/1`.
///
/// Options listed before this one see the path as it was sent.
pub fn with_strip_slashes() -> RouterOption {
    RouterOption::new(|router| {
        Router::new().fallback_service(NormalizePathLayer::trim_trailing_slash().layer(router))
    })
}

/// Log every request through `log`.
pub fn with_request_logger(log: Logger) -> RouterOption {
    with_middleware(RequestLoggerLayer::new(log))
}

/// Log requests through `log`, skipping the paths in `options`.
pub fn with_request_logger_options(log: Logger, options: RequestLoggerOptions) -> RouterOption {
    with_middleware(RequestLoggerLayer::with_options(log, options))
}

/// Add any tower layer to the stack.
pub fn with_middleware<L>(layer: L) -> RouterOption
where
    L: Layer<Route> + Clone + Send + Sync + 'static,
    L::Service: Service<Request> + Clone + Send + Sync + 'static,
    <L::Service as Service<Request>>::Response: IntoResponse + 'static,
    <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
    <L::Service as Service<Request>>::Future: Send + 'static,
{
    RouterOption::new(move |router| router.layer(layer))
}

async fn heartbeat(State(path): State<Arc<str>>, req: Request, next: Next) -> Response {
    let is_probe = req.method() == Method::GET || req.method() == Method::HEAD;
    if is_probe && req.uri().path().eq_ignore_ascii_case(&path) {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
            ".",
        )
            .into_response();
    }

    next.run(req).await
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    error!(panic = %detail, "Handler panicked");

    internal_error(&RequestId::default(), "internal server error")
}

/// Build the CORS layer from string lists. Unparseable entries are dropped.
fn build_cors_layer(origins: &[String], methods: &[String], headers: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()))
    };

    let methods: Vec<Method> = methods
        .iter()
        .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
        .collect();
    let headers: Vec<HeaderName> = headers
        .iter()
        .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
        .max_age(CORS_MAX_AGE)
}
