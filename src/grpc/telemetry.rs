//! OpenTelemetry server spans for gRPC calls.
//!
//! The span uses whatever tracer provider and propagator the host installed
//! through [`opentelemetry::global`]; with none installed both are no-ops.

use std::task::{Context, Poll};

use axum::http::{Request, Response};
use opentelemetry::trace::{
    FutureExt, SpanKind, Status as SpanStatus, TraceContextExt, Tracer as _,
};
use opentelemetry::{KeyValue, global};
use opentelemetry_http::HeaderExtractor;
use opentelemetry_semantic_conventions::attribute::{
    RPC_GRPC_STATUS_CODE, RPC_METHOD, RPC_SERVICE, RPC_SYSTEM,
};
use tonic::Code;

use super::status::{StatusBody, StatusHook, watch_status};

/// Instrumentation scope name for spans started here.
const TRACER_NAME: &str = "servicekit";

/// Split `/pkg.Service/Method` into `("pkg.Service", "Method")`.
fn split_method(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    trimmed.split_once('/').unwrap_or((trimmed, ""))
}

/// Layer that starts a server span per call when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcTelemetryLayer {
    enabled: bool,
}

impl GrpcTelemetryLayer {
    /// A disabled layer passes calls through untouched.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl<S> tower::Layer<S> for GrpcTelemetryLayer {
    type Service = GrpcTelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcTelemetryService {
            inner,
            enabled: self.enabled,
        }
    }
}

#[derive(Clone)]
pub struct GrpcTelemetryService<S> {
    inner: S,
    enabled: bool,
}

impl<S, ReqBody, ResBody> tower::Service<Request<ReqBody>> for GrpcTelemetryService<S>
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

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();

        if !self.enabled {
            return Box::pin(async move {
                let response = inner.call(req).await?;
                Ok(response.map(StatusBody::passthrough))
            });
        }

        let parent = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(req.headers()))
        });

        let path = req.uri().path().to_string();
        let (service, method) = split_method(&path);
        let attributes = vec![
            KeyValue::new(RPC_SYSTEM, "grpc"),
            KeyValue::new(RPC_SERVICE, service.to_string()),
            KeyValue::new(RPC_METHOD, method.to_string()),
        ];

        let tracer = global::tracer(TRACER_NAME);
        let span = tracer
            .span_builder(path)
            .with_kind(SpanKind::Server)
            .with_attributes(attributes)
            .start_with_context(&tracer, &parent);
        let cx = parent.with_span(span);

        let span_cx = cx.clone();
        let hook = StatusHook::new(move |code| {
            let span = span_cx.span();
            span.set_attribute(KeyValue::new(RPC_GRPC_STATUS_CODE, i64::from(i32::from(code))));
            if code != Code::Ok {
                span.set_status(SpanStatus::error(code.description()));
            }
            span.end();
        });

        Box::pin(async move {
            let response = inner.call(req).with_context(cx).await?;
            Ok(watch_status(response, hook))
        })
    }
}
