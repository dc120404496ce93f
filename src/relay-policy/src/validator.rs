//! Target URL extraction and validation.

use url::Url;

use super::{
    PolicyError, Result,
    config::{Policy, parse_leading_int},
    ip_validation::is_private_host,
};

/// Name of the query parameter carrying the target URL.
pub const TARGET_PARAM: &str = "url";

/// Extract the form-decoded `url` parameter from a raw query string.
///
/// The first occurrence wins; an empty value counts as absent.
pub fn target_param(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == TARGET_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Validate the target of a relay request.
///
/// Checks run in order and stop at the first failure: parameter present,
/// absolute URL, http(s) scheme, domain allowlist, private address. On
/// success the parser-normalized URL is returned.
pub fn validate_target(query: Option<&str>, policy: &Policy) -> Result<Url> {
    let raw = target_param(query).ok_or(PolicyError::MissingTargetUrl)?;
    let target = Url::parse(&raw).map_err(|_| PolicyError::InvalidUrl)?;
    check_destination(&target, policy)?;
    Ok(target)
}

/// Re-run the destination checks on a redirect target.
pub fn validate_redirect_hop(target: &Url, policy: &Policy) -> Result<()> {
    check_destination(target, policy)
}

/// Reject a request whose declared `Content-Length` exceeds the body limit.
///
/// Only the declared length is inspected here. A missing or unparseable
/// header passes; the streamed body is counted separately while forwarding.
pub fn check_declared_length(content_length: Option<&str>, policy: &Policy) -> Result<()> {
    let Some(declared) = parse_leading_int(content_length).and_then(|n| u64::try_from(n).ok())
    else {
        return Ok(());
    };
    if declared > policy.max_body_bytes() {
        return Err(PolicyError::BodyTooLarge {
            declared,
            limit: policy.max_body_bytes(),
        });
    }
    Ok(())
}

fn check_destination(target: &Url, policy: &Policy) -> Result<()> {
    let scheme = target.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(PolicyError::UnsupportedProtocol(scheme.to_string()));
    }

    let host = target.host_str().unwrap_or_default();

    if !policy.domain_allowed(host) {
        return Err(PolicyError::DomainNotAllowed(host.to_string()));
    }

    if is_private_host(host) {
        return Err(PolicyError::PrivateAddress(host.to_string()));
    }

    Ok(())
}
