//! Client IP resolution middleware.
//!
//! # Header Priority
//!
//! Checks in order (first match wins):
//! 1. `True-Client-IP`
//! 2. `X-Real-IP`
//! 3. `X-Forwarded-For` (first IP in a comma-separated list)
//! 4. The socket peer address, when the server was started with
//!    `into_make_service_with_connect_info::<SocketAddr>()`
//! 5. [`UNKNOWN_IP`]
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **These headers are client-controlled.** Only trust the resolved address
//! when the service sits behind a reverse proxy that overwrites them:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::Request;
use axum::http::request::Parts;
use tower::{Layer, Service};

/// Fallback value when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// The resolved client address of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(String);

impl ClientIp {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ClientIp>()
            .cloned()
            .unwrap_or_else(|| ClientIp(UNKNOWN_IP.to_string())))
    }
}

/// Where a header-provided address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromTrueClientIp(&'a str),
    FromRealIp(&'a str),
    FromXff(&'a str),
    NotFound,
}

impl<'a> ExtractedIp<'a> {
    fn value(self) -> Option<&'a str> {
        match self {
            Self::FromTrueClientIp(ip) | Self::FromRealIp(ip) | Self::FromXff(ip) => Some(ip),
            Self::NotFound => None,
        }
    }
}

#[inline]
fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[inline]
fn extract_ip_from_headers<B>(req: &Request<B>) -> ExtractedIp<'_> {
    if let Some(ip) = header_str(req, "true-client-ip") {
        return ExtractedIp::FromTrueClientIp(ip);
    }

    if let Some(ip) = header_str(req, "x-real-ip") {
        return ExtractedIp::FromRealIp(ip);
    }

    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = header_str(req, "x-forwarded-for")
        && let Some(first_ip) = forwarded.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    ExtractedIp::NotFound
}

/// Resolve the client address of a request.
///
/// Returns `Cow::Borrowed` for the "unknown" fallback to avoid allocating.
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    if let Some(ip) = extract_ip_from_headers(req).value() {
        return Cow::Owned(ip.to_string());
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Cow::Owned(addr.ip().to_string());
    }

    Cow::Borrowed(UNKNOWN_IP)
}

/// Layer that stores a [`ClientIp`] in request extensions.
#[derive(Clone, Default)]
pub struct RealIpLayer;

impl RealIpLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RealIpLayer {
    type Service = RealIpService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RealIpService { inner }
    }
}

#[derive(Clone)]
pub struct RealIpService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for RealIpService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let ip = extract_client_ip(&req).into_owned();
        req.extensions_mut().insert(ClientIp(ip));
        self.inner.call(req)
    }
}
