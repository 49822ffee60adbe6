//! # servicekit
//!
//! Shared plumbing for HTTP and gRPC services, so every service logs,
//! configures and connects the same way:
//!
//! - **Logging**: structured `tracing` output with a request logger carried
//!   in request extensions
//! - **Configuration**: typed environment getters that fall back to defaults
//! - **Connections**: Postgres pool and NATS client factories
//! - **HTTP**: axum router with request IDs, real IP, panic recovery,
//!   request logging and JSON envelopes
//! - **gRPC**: tonic server with call logging, OpenTelemetry, health and
//!   reflection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Host service                          │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  web::build_router (axum)    │  grpc::new_server (tonic)    │
//! │  RequestId → RealIp → Panic  │  Logging → Telemetry         │
//! │  → options → handlers        │  → health, reflection, apps  │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  Logger (tracing dispatch + context span)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  config (env)  │  postgres (sqlx)  │  nats (async-nats)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::Router;
//! use axum::routing::get;
//! use servicekit::web::{self, RequestId};
//! use servicekit::{CommonConfig, Logger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CommonConfig::from_env();
//!     let log = Logger::from_config(&config.log_config());
//!     log.install_global()?;
//!
//!     let routes = Router::new().route(
//!         "/ping",
//!         get(|rid: RequestId| async move {
//!             web::write_data(&rid, axum::http::StatusCode::OK, &"pong")
//!         }),
//!     );
//!     let app = web::build_router(routes, [
//!         web::with_heartbeat("/ping"),
//!         web::with_request_logger(log),
//!     ]);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod grpc;
pub mod logger;
pub mod nats;
pub mod postgres;
pub mod utils;
pub mod web;

// Re-exports for convenience
pub use config::CommonConfig;
pub use error::{KitError, KitResult};
pub use grpc::{GrpcServer, GrpcServerOptions, new_server};
pub use logger::{LogConfig, LogFormat, Logger};
pub use web::build_router;
