//! Request handling and transformation.
//!
//! # Responsibilities
//! - Attach a request ID (UUID v4) to every request and echo it back
//! - Extract routing-relevant information (host, path)
//! - Rewrite the request URI for forwarding to a member
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing; an incoming
//!   `x-request-id` is kept as-is
//! - Host matching ignores the port

use axum::http::header::HOST;
use axum::http::uri::{Authority, Scheme};
use axum::http::{HeaderMap, HeaderName, Uri};
use std::net::SocketAddr;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::routing::RouteRequest;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer that sets `x-request-id` when the client did not send one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies the request's `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Host without port, from the `Host` header or the absolute URI.
pub fn host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    let raw = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host())?;
    let host = match raw.rsplit_once(':') {
        // unbracketed IPv6 literals have no port to strip
        Some((name, port))
            if !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!name.contains(':') || name.ends_with(']')) =>
        {
            name
        }
        _ => raw,
    };
    Some(host)
}

pub fn route_request<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> RouteRequest<'a> {
    RouteRequest {
        host: host(headers, uri),
        path: uri.path(),
    }
}

/// Point `uri` at `member`, keeping path and query.
pub fn upstream_uri(uri: &Uri, member: SocketAddr) -> Result<Uri, axum::http::Error> {
    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(Authority::try_from(member.to_string().as_str())?);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some("/".parse()?);
    }
    Ok(Uri::from_parts(parts)?)
}
