//! Request logging middleware.
//!
//! Every request gets a logger carrying `request_id`, `method`, `path` and
//! `remote_addr` (plus `user_agent` with [`RequestLoggerLayer::with_options`]).
//! The logger is attached to the request extensions so handlers can extract
//! it, and exactly one `request completed` line is emitted once the response
//! body has been sent, or dropped before the end. `bytes` counts the body
//! bytes actually yielded, so streamed and compressed bodies are measured too:
//!
//! | Status | Level |
//! |---|---|
//! | 500 and above | ERROR |
//! | 400 to 499 | WARN |
//! | anything else | INFO |
//!
//! Skip-listed paths bypass the middleware entirely: no line is emitted and
//! no logger is attached.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{Request, Response, StatusCode, header};
use http_body::{Body as HttpBody, Frame, SizeHint};
use pin_project_lite::pin_project;
use tower::{Layer, Service};
use tracing::Level;

use super::real_ip::{ClientIp, extract_client_ip};
use super::request_id::RequestId;
use crate::logger::{self, Logger, log_at};

/// Request ID recorded when the request never passed through the request ID layer.
const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Options for [`RequestLoggerLayer::with_options`].
#[derive(Debug, Clone, Default)]
pub struct RequestLoggerOptions {
    /// Exact paths that are never logged, e.g. `/health`, `/metrics`.
    pub skip_paths: Vec<String>,
}

/// Severity of the completion line for a response status.
pub fn level_for_status(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

/// Layer that logs one line per request and attaches a request logger.
#[derive(Clone)]
pub struct RequestLoggerLayer {
    log: Logger,
    skip_paths: Arc<HashSet<String>>,
    log_user_agent: bool,
}

impl RequestLoggerLayer {
    /// Log every request.
    pub fn new(log: Logger) -> Self {
        Self {
            log,
            skip_paths: Arc::new(HashSet::new()),
            log_user_agent: false,
        }
    }

    /// Log every request not in `options.skip_paths`, including the user agent.
    pub fn with_options(log: Logger, options: RequestLoggerOptions) -> Self {
        Self {
            log,
            skip_paths: Arc::new(options.skip_paths.into_iter().collect()),
            log_user_agent: true,
        }
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Request logger service wrapper.
#[derive(Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    layer: RequestLoggerLayer,
}

impl<S> RequestLoggerService<S> {
    fn request_logger<B>(&self, req: &Request<B>) -> Logger {
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .filter(|id| !id.is_empty())
            .map_or_else(|| UNKNOWN_REQUEST_ID.to_string(), RequestId::to_string);
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let remote_addr = req
            .extensions()
            .get::<ClientIp>()
            .map_or_else(|| extract_client_ip(req).into_owned(), ClientIp::to_string);

        if self.layer.log_user_agent {
            let user_agent = req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();

            self.layer.log.child(|| {
                tracing::error_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    remote_addr = %remote_addr,
                    user_agent = %user_agent,
                )
            })
        } else {
            self.layer.log.child(|| {
                tracing::error_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    remote_addr = %remote_addr,
                )
            })
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLoggerService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: HttpBody<Data = Bytes>,
{
    type Response = Response<LoggedBody<ResBody>>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();

        if self.layer.skip_paths.contains(req.uri().path()) {
            return Box::pin(async move {
                let response = inner.call(req).await?;
                Ok(response.map(LoggedBody::passthrough))
            });
        }

        let start = Instant::now();
        let req_log = self.request_logger(&req);
        logger::attach(req.extensions_mut(), req_log.clone());

        Box::pin(async move {
            let response = inner.call(req).await?;

            let completion = Completion {
                log: req_log,
                status: response.status(),
                start,
                bytes: 0,
                written: false,
            };
            Ok(response.map(|inner| LoggedBody {
                inner,
                completion: Some(completion),
            }))
        })
    }
}

/// The pending `request completed` line for one response.
///
/// Written at most once; dropping an unwritten completion writes it.
struct Completion {
    log: Logger,
    status: StatusCode,
    start: Instant,
    bytes: u64,
    written: bool,
}

impl Completion {
    fn write(&mut self) {
        if std::mem::replace(&mut self.written, true) {
            return;
        }

        let status = self.status;
        let bytes = self.bytes;
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        self.log.in_scope(|| {
            log_at!(
                level_for_status(status),
                status = status.as_u16(),
                bytes,
                duration_ms,
                "request completed"
            )
        });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.write();
    }
}

pin_project! {
    /// Response body that counts the bytes it yields and writes the request's
    /// completion line when it ends, fails or is dropped.
    pub struct LoggedBody<B> {
        #[pin]
        inner: B,
        completion: Option<Completion>,
    }
}

impl<B> LoggedBody<B> {
    /// Wrap `inner` without logging anything.
    fn passthrough(inner: B) -> Self {
        Self {
            inner,
            completion: None,
        }
    }
}

impl<B> HttpBody for LoggedBody<B>
where
    B: HttpBody<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let polled = ready!(this.inner.as_mut().poll_frame(cx));

        if let Some(completion) = this.completion.as_mut() {
            match &polled {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        completion.bytes += data.len() as u64;
                    }
                    if this.inner.is_end_stream() {
                        completion.write();
                    }
                }
                Some(Err(_)) | None => completion.write(),
            }
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Body;
    use tower::ServiceExt;

    use super::*;
    use crate::logger::testing::json_logger;

    #[test]
    fn test_level_for_status() {
        assert_eq!(level_for_status(StatusCode::OK), Level::INFO);
        assert_eq!(level_for_status(StatusCode::NOT_FOUND), Level::WARN);
        assert_eq!(level_for_status(StatusCode::INTERNAL_SERVER_ERROR), Level::ERROR);
    }

    #[test]
    fn test_level_for_status_boundaries() {
        assert_eq!(level_for_status(StatusCode::NO_CONTENT), Level::INFO);
        assert_eq!(level_for_status(StatusCode::PERMANENT_REDIRECT), Level::INFO);
        assert_eq!(level_for_status(StatusCode::BAD_REQUEST), Level::WARN);
        assert_eq!(
            level_for_status(StatusCode::from_u16(499).unwrap()),
            Level::WARN
        );
        assert_eq!(level_for_status(StatusCode::SERVICE_UNAVAILABLE), Level::ERROR);
    }

    async fn respond(log: Logger, body: fn() -> Body) -> Response<LoggedBody<Body>> {
        let svc = RequestLoggerLayer::new(log).layer(tower::service_fn(
            move |_req: Request<Body>| async move { Ok::<_, Infallible>(Response::new(body())) },
        ));
        svc.oneshot(Request::new(Body::empty())).await.unwrap()
    }

    fn streamed() -> Body {
        Body::from_stream(tokio_stream::iter([
            Ok::<_, Infallible>("ab"),
            Ok("cde"),
            Ok("f"),
        ]))
    }

    #[tokio::test]
    async fn test_streamed_body_bytes_are_counted() {
        let (log, capture) = json_logger("info");
        let response = respond(log, streamed).await;
        assert!(response.body().size_hint().exact().is_none());

        let body = axum::body::to_bytes(Body::new(response.into_body()), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"abcdef");

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["message"], "request completed");
        assert_eq!(lines[0]["bytes"], 6);
        assert_eq!(lines[0]["status"], 200);
    }

    #[tokio::test]
    async fn test_full_body_logged_when_sent() {
        let (log, capture) = json_logger("info");
        let response = respond(log, || Body::from("hello")).await;

        // Nothing is written until the body has gone out.
        assert!(capture.lines().is_empty());

        axum::body::to_bytes(Body::new(response.into_body()), usize::MAX)
            .await
            .unwrap();
        assert_eq!(capture.lines()[0]["bytes"], 5);
    }

    #[tokio::test]
    async fn test_dropped_body_logged_once() {
        let (log, capture) = json_logger("info");
        let response = respond(log, streamed).await;
        drop(response);

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["bytes"], 0);
    }
}
