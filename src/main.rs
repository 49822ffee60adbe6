use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use serde::Serialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::{error, info};

use servicekit::config::{self, CommonConfig};
use servicekit::grpc::{self, GrpcServerOptions};
use servicekit::nats::{self, NatsConfig};
use servicekit::postgres::{self, PgConfig};
use servicekit::utils::Shutdown;
use servicekit::web::{self, RequestId, RequestLoggerOptions};
use servicekit::{KitError, Logger};

const HEARTBEAT_PATH: &str = "/ping";

#[derive(Clone)]
struct AppState {
    db: Option<PgPool>,
}

#[derive(Serialize)]
struct Order {
    id: u64,
    status: &'static str,
}

#[derive(Serialize)]
struct Page {
    page: u32,
    total: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = CommonConfig::from_env();
    let log = Logger::from_config(&config.log_config());

    if let Err(e) = log.install_global() {
        eprintln!("{e}");
        return ExitCode::from(exitcode::SOFTWARE as u8);
    }

    info!(
        service = %config.service_name,
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Starting service"
    );

    match run(&config, log).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run both servers, returning an exit code on error.
async fn run(config: &CommonConfig, log: Logger) -> Result<(), exitcode::ExitCode> {
    let http_addr = parse_addr("HTTP_ADDR", "0.0.0.0:8080")?;
    let grpc_addr = parse_addr("GRPC_ADDR", "0.0.0.0:9090")?;
    let http_timeout = config::get_env_duration("HTTP_TIMEOUT", Duration::from_secs(30));

    let db = match config::get_env("DATABASE_URL", "").as_str() {
        "" => None,
        url => Some(postgres::open(&PgConfig::new(url)).await.map_err(|e| {
            error!("{e}");
            exitcode::UNAVAILABLE
        })?),
    };

    let nats_url = config::get_env("NATS_URL", "");
    let _nats = if nats_url.is_empty() {
        None
    } else {
        let nats_config = NatsConfig::new(nats_url, config.service_name.as_str());
        Some(nats::connect(&nats_config).await.map_err(|e| {
            error!("{e}");
            exitcode::UNAVAILABLE
        })?)
    };

    let state = AppState { db };
    let routes = Router::new()
        .route("/v1/orders", get(list_orders))
        .route("/v1/orders/{id}", get(get_order))
        .route("/ready", get(ready))
        .with_state(state);

    let app = web::build_router(
        routes,
        [
            web::with_heartbeat(HEARTBEAT_PATH),
            web::with_request_logger_options(
                log.clone(),
                RequestLoggerOptions {
                    skip_paths: vec!["/ready".to_string()],
                },
            ),
            web::with_cors_defaults(),
            web::with_timeout(http_timeout),
        ],
    );

    let grpc_server = grpc::new_server(
        GrpcServerOptions {
            logger: Some(log),
            enable_health: true,
            enable_reflection: true,
            enable_otel: config::get_env_bool("OTEL_ENABLED", false),
            ..Default::default()
        },
        Vec::new(),
    )
    .await
    .map_err(|e: KitError| {
        error!("{e}");
        exitcode::CONFIG
    })?;

    let listener = TcpListener::bind(http_addr).await.map_err(|e| {
        error!("Failed to bind to {http_addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("HTTP server listening on http://{http_addr}");
    info!("gRPC server listening on {grpc_addr}");

    let shutdown = Shutdown::on_signal();

    let http = async {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().wait())
        .await
        .map_err(|e| {
            error!("HTTP server error: {e}");
            exitcode::SOFTWARE
        })
    };

    let grpc = async {
        grpc_server
            .serve_with_shutdown(grpc_addr, shutdown.clone().wait())
            .await
            .map_err(|e| {
                error!("gRPC server error: {e}");
                exitcode::SOFTWARE
            })
    };

    tokio::try_join!(http, grpc)?;

    info!("Server shutdown complete");
    Ok(())
}

fn parse_addr(key: &str, default: &str) -> Result<SocketAddr, exitcode::ExitCode> {
    let value = config::get_env(key, default);
    value.parse().map_err(|e| {
        error!("Invalid {key} '{value}': {e}");
        exitcode::CONFIG
    })
}

async fn list_orders(rid: RequestId) -> Response {
    let orders = [
        Order { id: 1, status: "open" },
        Order { id: 2, status: "shipped" },
    ];
    web::write_data_with_meta(&rid, StatusCode::OK, &orders, &Page { page: 1, total: 2 })
}

async fn get_order(rid: RequestId, log: Logger, Path(id): Path<u64>) -> Response {
    match id {
        1 | 2 => web::write_data(&rid, StatusCode::OK, &Order { id, status: "open" }),
        _ => {
            log.info("order lookup missed");
            web::not_found(&rid, &format!("order {id} not found"))
        }
    }
}

async fn ready(State(state): State<AppState>, rid: RequestId) -> Response {
    if let Some(db) = &state.db
        && let Err(e) = sqlx::query("SELECT 1").execute(db).await
    {
        return web::service_unavailable(&rid, &format!("database unavailable: {e}"));
    }
    web::no_content()
}
