//! CORS origin decisions.

use super::{PolicyError, Result, config::Policy};

/// Origin allowlist entry admitting every origin.
pub const ANY_ORIGIN: &str = "*";

impl Policy {
    /// Whether the origin allowlist contains the `*` wildcard.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins().iter().any(|o| o == ANY_ORIGIN)
    }

    /// Whether a caller origin passes the allowlist.
    ///
    /// An empty allowlist or a `*` entry admits everything, including a
    /// missing origin. Otherwise the origin must match an entry exactly.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins().is_empty() || self.allows_any_origin() {
            return true;
        }
        origin.is_some_and(|origin| self.allowed_origins().iter().any(|o| o == origin))
    }
}

/// Check a non-preflight request's origin.
///
/// Requests without an `Origin` header are same-origin or server-to-server
/// calls and always pass.
pub fn check_request_origin(origin: Option<&str>, policy: &Policy) -> Result<()> {
    match origin {
        Some(origin) if !policy.origin_allowed(Some(origin)) => {
            Err(PolicyError::OriginNotAllowed(origin.to_string()))
        }
        _ => Ok(()),
    }
}

/// Value for `Access-Control-Allow-Origin` on a preflight response.
pub fn preflight_allow_origin(origin: Option<&str>) -> &str {
    origin.unwrap_or(ANY_ORIGIN)
}

/// Value for `Access-Control-Allow-Origin` on a relayed response.
pub fn response_allow_origin<'a>(origin: Option<&'a str>, policy: &Policy) -> &'a str {
    if policy.allows_any_origin() {
        ANY_ORIGIN
    } else {
        origin.unwrap_or(ANY_ORIGIN)
    }
}
