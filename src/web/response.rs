//! JSON response helpers and the standard envelopes.
//!
//! # Envelopes
//!
//! Success:
//!
//! ```json
//! {"data": {...}, "meta": {...}, "request_id": "..."}
//! ```
//!
//! Error:
//!
//! ```json
//! {"error": {"code": "not_found", "message": "order 7 not found"}, "request_id": "..."}
//! ```
//!
//! `meta` and `request_id` are omitted when absent. Handlers obtain the
//! request ID through the [`RequestId`] extractor:
//!
//! ```rust,ignore
//! async fn get_order(rid: RequestId, Path(id): Path<u64>) -> Response {
//!     match find(id).await {
//!         Some(order) => write_data(&rid, StatusCode::OK, &order),
//!         None => not_found(&rid, &format!("order {id} not found")),
//!     }
//! }
//! ```

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use serde::Serialize;

use super::request_id::RequestId;

/// Body written when the real body cannot be serialized.
const ENCODE_FAILURE_BODY: &str =
    r#"{"error":{"code":"internal_error","message":"failed to encode response"}}"#;

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct SuccessEnvelope<'a, T: Serialize, M: Serialize = ()> {
    pub data: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<&'a M>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<&'a str>,
}

/// Standard error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub error: ErrorDetail<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<&'a str>,
}

/// Machine-readable code plus human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorDetail<'a> {
    pub code: &'a str,
    pub message: &'a str,
}

fn request_id_field(request_id: &RequestId) -> Option<&str> {
    (!request_id.is_empty()).then(|| request_id.as_str())
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Serialize `body` as JSON with `status`.
///
/// Serialization happens before anything is committed: if it fails, the
/// response is a 500 with a fixed minimal error body instead.
pub fn write_json<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => json_response(status, bytes),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response body");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ENCODE_FAILURE_BODY.as_bytes().to_vec(),
            )
        }
    }
}

/// Success envelope `{data, request_id}`.
pub fn write_data<T: Serialize>(request_id: &RequestId, status: StatusCode, data: &T) -> Response {
    write_json(
        status,
        &SuccessEnvelope::<T, ()> {
            data,
            meta: None,
            request_id: request_id_field(request_id),
        },
    )
}

/// Success envelope `{data, meta, request_id}`, e.g. for pagination.
pub fn write_data_with_meta<T: Serialize, M: Serialize>(
    request_id: &RequestId,
    status: StatusCode,
    data: &T,
    meta: &M,
) -> Response {
    write_json(
        status,
        &SuccessEnvelope {
            data,
            meta: Some(meta),
            request_id: request_id_field(request_id),
        },
    )
}

/// Error envelope `{error: {code, message}, request_id}`.
pub fn write_error(
    request_id: &RequestId,
    status: StatusCode,
    code: &str,
    message: &str,
) -> Response {
    write_json(
        status,
        &ErrorEnvelope {
            error: ErrorDetail { code, message },
            request_id: request_id_field(request_id),
        },
    )
}

/// 400 `bad_request`.
pub fn bad_request(request_id: &RequestId, message: &str) -> Response {
    write_error(request_id, StatusCode::BAD_REQUEST, "bad_request", message)
}

/// 401 `unauthorized`.
pub fn unauthorized(request_id: &RequestId, message: &str) -> Response {
    write_error(request_id, StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// 403 `forbidden`.
pub fn forbidden(request_id: &RequestId, message: &str) -> Response {
    write_error(request_id, StatusCode::FORBIDDEN, "forbidden", message)
}

/// 404 `not_found`.
pub fn not_found(request_id: &RequestId, message: &str) -> Response {
    write_error(request_id, StatusCode::NOT_FOUND, "not_found", message)
}

/// 409 `conflict`.
pub fn conflict(request_id: &RequestId, message: &str) -> Response {
    write_error(request_id, StatusCode::CONFLICT, "conflict", message)
}

/// 422 `unprocessable_entity`.
pub fn unprocessable(request_id: &RequestId, message: &str) -> Response {
    write_error(
        request_id,
        StatusCode::UNPROCESSABLE_ENTITY,
        "unprocessable_entity",
        message,
    )
}

/// 500 `internal_error`.
pub fn internal_error(request_id: &RequestId, message: &str) -> Response {
    write_error(
        request_id,
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        message,
    )
}

/// 503 `service_unavailable`.
pub fn service_unavailable(request_id: &RequestId, message: &str) -> Response {
    write_error(
        request_id,
        StatusCode::SERVICE_UNAVAILABLE,
        "service_unavailable",
        message,
    )
}

/// Empty 204 response.
pub fn no_content() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}
