//! tonic server construction with the standard layers and services.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use axum::http::Request;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::transport::Server;
use tonic::transport::server::Router;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;
use tower::Service;
use tower::layer::util::{Identity, Stack};
use tracing::info;

use super::logging::GrpcLoggingLayer;
use super::telemetry::GrpcTelemetryLayer;
use crate::error::{KitError, KitResult};
use crate::logger::Logger;

/// Layers installed on every server: logging outermost, then telemetry.
pub type GrpcLayers = Stack<GrpcTelemetryLayer, Stack<GrpcLoggingLayer, Identity>>;

/// The router returned by [`new_server`].
pub type GrpcRouter = Router<GrpcLayers>;

/// A transport setting applied to the builder before the layers, e.g.
/// `Box::new(|s| s.timeout(Duration::from_secs(5)))`.
pub type ServerOption = Box<dyn FnOnce(Server) -> Server + Send>;

/// Settings for [`new_server`].
#[derive(Default)]
pub struct GrpcServerOptions {
    /// Required; use [`Logger::nop`] to log nothing.
    pub logger: Option<Logger>,
    /// Register `grpc.health.v1.Health` with the empty service name serving.
    pub enable_health: bool,
    /// Register server reflection v1.
    pub enable_reflection: bool,
    /// Start an OpenTelemetry span per call.
    pub enable_otel: bool,
    /// Encoded file descriptor sets of the caller's services, for reflection.
    pub reflection_descriptors: Vec<&'static [u8]>,
}

/// A configured server awaiting the caller's services.
pub struct GrpcServer {
    router: GrpcRouter,
    health: Option<HealthReporter>,
}

impl GrpcServer {
    /// Register an application service.
    pub fn add_service<S>(mut self, service: S) -> Self
    where
        S: Service<Request<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Response: axum::response::IntoResponse,
        S::Future: Send + 'static,
    {
        self.router = self.router.add_service(service);
        self
    }

    /// Health reporter for flipping per-service status, when health is enabled.
    pub fn health_reporter(&self) -> Option<&HealthReporter> {
        self.health.as_ref()
    }

    /// The tonic router and the health reporter, for serving on a custom listener.
    pub fn into_parts(self) -> (GrpcRouter, Option<HealthReporter>) {
        (self.router, self.health)
    }

    /// Serve on `addr` until `signal` resolves.
    ///
    /// # Errors
    ///
    /// Returns the transport error if binding or serving fails.
    pub async fn serve_with_shutdown<F>(
        self,
        addr: SocketAddr,
        signal: F,
    ) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()>,
    {
        self.router.serve_with_shutdown(addr, signal).await
    }
}

/// Build a server with call logging, optional tracing, health and reflection.
///
/// `extra` transport options are applied in order before the layers. Service
/// interceptors added later run inside the logging and telemetry layers.
///
/// # Errors
///
/// Returns `KitError::Config` if `options.logger` is unset or the reflection
/// descriptors cannot be decoded.
pub async fn new_server(
    options: GrpcServerOptions,
    extra: Vec<ServerOption>,
) -> KitResult<GrpcServer> {
    let log = options.logger.ok_or_else(|| {
        KitError::Config(
            "creating grpc server: logger must be set (use Logger::nop() to disable logging)"
                .to_string(),
        )
    })?;

    let mut builder = extra
        .into_iter()
        .fold(Server::builder(), |server, option| option(server))
        .layer(GrpcLoggingLayer::new(log))
        .layer(GrpcTelemetryLayer::new(options.enable_otel));

    let (health, health_service) = if options.enable_health {
        let (reporter, service) = tonic_health::server::health_reporter();
        reporter.set_service_status("", ServingStatus::Serving).await;
        (Some(reporter), Some(service))
    } else {
        (None, None)
    };

    let reflection_service = if options.enable_reflection {
        let service = options
            .reflection_descriptors
            .into_iter()
            .fold(
                tonic_reflection::server::Builder::configure()
                    .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET),
                |builder, descriptors| builder.register_encoded_file_descriptor_set(descriptors),
            )
            .build_v1()
            .map_err(|e| KitError::Config(format!("building grpc reflection: {e}")))?;
        Some(service)
    } else {
        None
    };

    let router = builder
        .add_optional_service(health_service)
        .add_optional_service(reflection_service);

    info!(
        health = options.enable_health,
        reflection = options.enable_reflection,
        otel = options.enable_otel,
        "gRPC server configured"
    );

    Ok(GrpcServer { router, health })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_missing_logger_is_config_error() {
        let result = new_server(
            GrpcServerOptions {
                enable_health: true,
                ..Default::default()
            },
            Vec::new(),
        )
        .await;

        match result {
            Err(KitError::Config(message)) => assert!(message.contains("logger must be set")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a configuration error"),
        }
    }

    #[tokio::test]
    async fn test_health_reporter_only_when_enabled() {
        let timeout: ServerOption = Box::new(|s| s.timeout(Duration::from_secs(5)));
        let server = new_server(
            GrpcServerOptions {
                logger: Some(Logger::nop()),
                enable_health: true,
                enable_reflection: true,
                ..Default::default()
            },
            vec![timeout],
        )
        .await
        .unwrap();
        assert!(server.health_reporter().is_some());

        let server = new_server(
            GrpcServerOptions {
                logger: Some(Logger::nop()),
                ..Default::default()
            },
            Vec::new(),
        )
        .await
        .unwrap();
        assert!(server.health_reporter().is_none());
    }
}
