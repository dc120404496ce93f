//! Header sanitization for both directions of the relay.
//!
//! Outbound requests lose anything that identifies the caller or the relay's
//! own network position, plus hop-by-hop framing headers that the transport
//! manages itself. Inbound responses keep only a small allow-set so the
//! relay's CORS and security headers are the only ones that apply.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

/// Identifying or forwarding headers never sent to a target.
const IDENTIFYING_HEADERS: &[&str] = &[
    "host",
    "origin",
    "referer",
    "cookie",
    "set-cookie",
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
    "cf-ray",
    "cf-visitor",
];

/// Connection-scoped headers (RFC 9110 §7.6.1) never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

/// Upstream response headers relayed to the caller.
const RELAYED_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "cache-control",
    "expires",
    "last-modified",
    "etag",
];

/// Security headers added to every relayed response.
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
];

// `HeaderName` is always lower-case, so membership is case-insensitive.
fn listed(name: &HeaderName, list: &[&str]) -> bool {
    list.contains(&name.as_str())
}

/// Build the header set sent to the target.
///
/// `forwards_body` is false for GET and HEAD; the declared length is
/// dropped with the body then.
pub fn sanitize_outbound(inbound: &HeaderMap, forwards_body: bool) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if listed(name, IDENTIFYING_HEADERS) || listed(name, HOP_BY_HOP_HEADERS) {
            continue;
        }
        if !forwards_body && name == header::CONTENT_LENGTH {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }
    outbound
}

/// Keep only the allow-listed upstream response headers.
pub fn filter_inbound(upstream: &HeaderMap) -> HeaderMap {
    let mut relayed = HeaderMap::new();
    for (name, value) in upstream {
        if listed(name, RELAYED_RESPONSE_HEADERS) {
            relayed.append(name.clone(), value.clone());
        }
    }
    relayed
}

/// Attach the fixed security headers.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(*name),
            HeaderValue::from_static(*value),
        );
    }
}
