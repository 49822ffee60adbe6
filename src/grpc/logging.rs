//! Per-call logging for tonic servers.
//!
//! One tower layer covers unary and streaming calls alike: the line is
//! written when the final status is known, which for streams is when the
//! response body ends.
//!
//! ```text
//! {"level":"WARN","message":"grpc request","grpc_method":"/orders.v1.Orders/Get",
//!  "grpc_code":"NotFound","duration_ms":1.8,"request_id":"abc","peer_ip":"10.0.0.7:51234",...}
//! ```

use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Request, Response};
use tonic::Code;
use tonic::transport::server::TcpConnectInfo;
use tracing::Level;

use super::status::{StatusBody, StatusHook, watch_status};
use crate::logger::{self, Logger, log_at};
use crate::web::REQUEST_ID_HEADER;

/// Severity of the `grpc request` line for a status code.
pub fn level_for_code(code: Code) -> Level {
    match code {
        Code::Ok => Level::INFO,
        Code::Cancelled
        | Code::DeadlineExceeded
        | Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::PermissionDenied
        | Code::Unauthenticated
        | Code::FailedPrecondition
        | Code::ResourceExhausted
        | Code::Aborted
        | Code::OutOfRange => Level::WARN,
        _ => Level::ERROR,
    }
}

/// Layer that logs one line per gRPC call and attaches a call logger.
#[derive(Clone)]
pub struct GrpcLoggingLayer {
    log: Logger,
}

impl GrpcLoggingLayer {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

impl<S> tower::Layer<S> for GrpcLoggingLayer {
    type Service = GrpcLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcLoggingService {
            inner,
            log: self.log.clone(),
        }
    }
}

/// gRPC logging service wrapper.
#[derive(Clone)]
pub struct GrpcLoggingService<S> {
    inner: S,
    log: Logger,
}

/// Inbound `x-request-id` metadata, empty when absent.
fn request_id<B>(req: &Request<B>) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Peer `ip:port`, empty when the transport did not record one.
fn peer_addr<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<TcpConnectInfo>()
        .and_then(TcpConnectInfo::remote_addr)
        .map(|addr| addr.to_string())
        .unwrap_or_default()
}

impl<S, ReqBody, ResBody> tower::Service<Request<ReqBody>> for GrpcLoggingService<S>
where
    S: tower::Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<StatusBody<ResBody>>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let method = req.uri().path().to_string();
        let request_id = request_id(&req);
        let peer_ip = peer_addr(&req);

        let call_log = self.log.child(|| {
            tracing::error_span!(
                "grpc_call",
                request_id = %request_id,
                grpc_method = %method,
            )
        });
        logger::attach(req.extensions_mut(), call_log);

        let log = self.log.clone();
        let hook = StatusHook::new(move |code| {
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            log.in_scope(|| {
                log_at!(
                    level_for_code(code),
                    grpc_method = %method,
                    grpc_code = ?code,
                    duration_ms,
                    request_id = %request_id,
                    peer_ip = %peer_ip,
                    "grpc request"
                )
            });
        });

        let mut inner = self.inner.clone();

        Box::pin(async move {
            match inner.call(req).await {
                Ok(response) => Ok(watch_status(response, hook)),
                Err(e) => {
                    let mut hook = hook;
                    hook.fire(Code::Unknown);
                    Err(e)
                }
            }
        })
    }
}
