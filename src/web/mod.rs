//! HTTP helpers for axum services.
//!
//! - [`build_router`] wraps routes with the standard middleware stack
//! - [`RequestLoggerLayer`] emits one structured line per request
//! - [`response`] writes the JSON success and error envelopes

mod real_ip;
mod request_id;
mod request_logger;
pub mod response;
mod router;

pub use real_ip::{ClientIp, RealIpLayer, RealIpService, UNKNOWN_IP, extract_client_ip};
pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdExt, RequestIdLayer, RequestIdService};
pub use request_logger::{
    LoggedBody, RequestLoggerLayer, RequestLoggerOptions, RequestLoggerService, level_for_status,
};
pub use response::{
    ErrorDetail, ErrorEnvelope, SuccessEnvelope, bad_request, conflict, forbidden, internal_error,
    no_content, not_found, service_unavailable, unauthorized, unprocessable, write_data,
    write_data_with_meta, write_error, write_json,
};
pub use router::{
    RouterOption, build_router, with_compression, with_cors, with_cors_defaults, with_heartbeat,
    with_middleware, with_request_logger, with_request_logger_options, with_strip_slashes,
    with_timeout,
};
