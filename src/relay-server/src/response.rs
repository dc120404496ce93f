//! Formatting of relayed upstream responses.

use axum::response::Response;
use relay_policy::Policy;

use crate::cors::apply_relay_headers;
use crate::headers::{apply_security_headers, filter_inbound};
use crate::upstream::UpstreamResponse;

/// Build the caller-facing response for a successful upstream answer.
///
/// The upstream status is kept and its body is streamed through untouched.
/// Only allow-listed upstream headers survive; CORS and security headers
/// are added on top.
pub fn relay_response(upstream: UpstreamResponse, origin: Option<&str>, policy: &Policy) -> Response {
    let mut headers = filter_inbound(&upstream.headers);
    apply_relay_headers(&mut headers, origin, policy);
    apply_security_headers(&mut headers);

    let mut response = Response::new(upstream.body);
    *response.status_mut() = upstream.status;
    *response.headers_mut() = headers;
    response
}
