//! gRPC server construction and per-call logging over a real socket.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use servicekit::grpc::{GrpcServerOptions, new_server};
use servicekit::{KitError, Logger};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::Code;
use tonic::transport::Channel;
use tonic_health::ServingStatus;
use tonic_health::pb::health_check_response::ServingStatus as WireStatus;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_client::HealthClient;

use common::{Capture, ephemeral_listener, json_logger};

struct Served {
    channel: Channel,
    client: HealthClient<Channel>,
    reporter: tonic_health::server::HealthReporter,
    capture: Capture,
    server: tokio::task::JoinHandle<()>,
}

async fn serve_with_health() -> Served {
    let (log, capture) = json_logger();
    let server = new_server(
        GrpcServerOptions {
            logger: Some(log),
            enable_health: true,
            enable_reflection: true,
            ..Default::default()
        },
        Vec::new(),
    )
    .await
    .unwrap();

    let (router, reporter) = server.into_parts();
    let (listener, addr) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        router
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();

    Served {
        client: HealthClient::new(channel.clone()),
        channel,
        reporter: reporter.unwrap(),
        capture,
        server,
    }
}

fn check_request(service: &str, request_id: Option<&str>) -> tonic::Request<HealthCheckRequest> {
    let mut req = tonic::Request::new(HealthCheckRequest {
        service: service.to_string(),
    });
    if let Some(id) = request_id {
        req.metadata_mut().insert("x-request-id", id.parse().unwrap());
    }
    req
}

#[tokio::test]
async fn test_new_server_requires_logger() {
    let result = new_server(GrpcServerOptions::default(), Vec::new()).await;

    assert!(matches!(result, Err(KitError::Config(_))));
}

#[tokio::test]
async fn test_nop_logger_is_accepted() {
    let result = new_server(
        GrpcServerOptions {
            logger: Some(Logger::nop()),
            ..Default::default()
        },
        Vec::new(),
    )
    .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_health_serving_and_logged() {
    let mut served = serve_with_health().await;

    let response = served
        .client
        .check(check_request("", Some("abc")))
        .await
        .unwrap();
    assert_eq!(response.into_inner().status, WireStatus::Serving as i32);

    let lines = served.capture.with_message("grpc request");
    assert_eq!(lines.len(), 1);

    let line = &lines[0];
    assert_eq!(line["level"], "INFO");
    assert_eq!(line["grpc_method"], "/grpc.health.v1.Health/Check");
    assert_eq!(line["grpc_code"], "Ok");
    assert_eq!(line["request_id"], "abc");
    assert!(line["peer_ip"].as_str().unwrap().starts_with("127.0.0.1:"));
    assert!(line["duration_ms"].is_number());
    assert_eq!(line["service"], "orders");

    served.server.abort();
}

#[tokio::test]
async fn test_client_error_logged_at_warn() {
    let mut served = serve_with_health().await;

    let status = served
        .client
        .check(check_request("orders.v1.Unknown", None))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let line = &served.capture.with_message("grpc request")[0];
    assert_eq!(line["level"], "WARN");
    assert_eq!(line["grpc_code"], "NotFound");
    assert_eq!(line["request_id"], "");

    served.server.abort();
}

#[tokio::test]
async fn test_unknown_method_logged_at_error() {
    let served = serve_with_health().await;

    let mut grpc = tonic::client::Grpc::new(served.channel.clone());
    grpc.ready().await.unwrap();
    let path = tonic::codegen::http::uri::PathAndQuery::from_static("/orders.v1.Orders/Get");
    let codec = tonic::codec::ProstCodec::<HealthCheckRequest, HealthCheckRequest>::default();
    let status = grpc
        .unary(check_request("", None), path, codec)
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    let line = &served.capture.with_message("grpc request")[0];
    assert_eq!(line["level"], "ERROR");
    assert_eq!(line["grpc_code"], "Unimplemented");

    served.server.abort();
}

#[tokio::test]
async fn test_reporter_controls_health_status() {
    let mut served = serve_with_health().await;

    served
        .reporter
        .set_service_status("", ServingStatus::NotServing)
        .await;

    let response = served.client.check(check_request("", None)).await.unwrap();
    assert_eq!(response.into_inner().status, WireStatus::NotServing as i32);

    served.server.abort();
}
