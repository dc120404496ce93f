//! CORS response headers and preflight handling.

use std::borrow::Cow;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use relay_policy::{Policy, preflight_allow_origin, response_allow_origin};
use tracing::debug;

/// Methods advertised to browsers.
pub const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// Request headers advertised to browsers.
pub const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Requested-With";

/// Response headers exposed to scripts on relayed responses.
pub const EXPOSE_HEADERS: &str = "Content-Length, Content-Type";

/// Preflight cache lifetime in seconds.
pub const MAX_AGE: &str = "86400";

/// Read the `Origin` header.
///
/// Bytes outside visible ASCII are replaced rather than dropped, so a present
/// but undecodable header still takes part in the allowlist decision.
pub fn request_origin(headers: &HeaderMap) -> Option<Cow<'_, str>> {
    headers
        .get(header::ORIGIN)
        .map(|v| String::from_utf8_lossy(v.as_bytes()))
}

/// Answer a CORS preflight without contacting any target.
pub fn preflight(origin: Option<&str>, policy: &Policy) -> Response {
    if !policy.origin_allowed(origin) {
        debug!(origin = ?origin, "Preflight rejected");
        return status_only(StatusCode::FORBIDDEN);
    }

    let mut response = status_only(StatusCode::OK);
    let headers = response.headers_mut();
    insert(
        headers,
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        preflight_allow_origin(origin),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(MAX_AGE),
    );
    response
}

/// Attach CORS headers to a relayed upstream response.
pub fn apply_relay_headers(headers: &mut HeaderMap, origin: Option<&str>, policy: &Policy) {
    insert(
        headers,
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        response_allow_origin(origin, policy),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
}

/// Attach the permissive CORS headers used on every error response.
pub fn apply_error_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
}

fn status_only(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

// Origins read with replacement characters cannot be echoed back; fall back
// to the wildcard then.
fn insert(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    let value = HeaderValue::from_str(value).unwrap_or(HeaderValue::from_static("*"));
    headers.insert(name, value);
}
