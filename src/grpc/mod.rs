//! gRPC helpers for tonic services.
//!
//! ```rust,ignore
//! let server = grpc::new_server(
//!     GrpcServerOptions {
//!         logger: Some(log.clone()),
//!         enable_health: true,
//!         enable_reflection: true,
//!         ..Default::default()
//!     },
//!     Vec::new(),
//! )
//! .await?
//! .add_service(OrdersServer::new(orders));
//!
//! server.serve_with_shutdown(addr, shutdown_signal()).await?;
//! ```

mod logging;
mod server;
mod status;
mod telemetry;

pub use logging::{GrpcLoggingLayer, GrpcLoggingService, level_for_code};
pub use server::{
    GrpcLayers, GrpcRouter, GrpcServer, GrpcServerOptions, ServerOption, new_server,
};
pub use status::StatusBody;
pub use telemetry::{GrpcTelemetryLayer, GrpcTelemetryService};
