//! Forwarding of a validated request to its target.

use axum::body::Body;
use axum::http::{HeaderMap, Method, header};
use relay_policy::{Policy, check_declared_length};
use tracing::{error, warn};
use url::Url;

use crate::error::{RelayError, RelayResult};
use crate::headers::sanitize_outbound;
use crate::upstream::{BodyLimit, OutboundRequest, Upstream, UpstreamError, UpstreamResponse};

/// A request that already passed target and origin validation.
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    pub target: Url,
    /// Unsanitized inbound headers.
    pub headers: HeaderMap,
    pub body: Body,
}

/// Result of one forwarding attempt.
#[derive(Debug)]
pub enum ProxyOutcome {
    /// The target answered; its status and body are relayed.
    Success(UpstreamResponse),
    /// No response head arrived within the configured timeout.
    Timeout,
    /// The target could not be reached.
    TransportFailure(String),
    /// The request was refused by a limit checked during forwarding.
    PolicyRejection(RelayError),
}

impl ProxyOutcome {
    /// Collapse the outcome into the upstream response or the error to render.
    pub fn into_result(self) -> RelayResult<UpstreamResponse> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Timeout => Err(RelayError::Timeout),
            Self::TransportFailure(_) => Err(RelayError::UpstreamFailed),
            Self::PolicyRejection(err) => Err(err),
        }
    }
}

/// Whether requests with this method carry a body to the target.
pub fn forwards_body(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD
}

/// Forward `request` through `upstream` under the limits of `policy`.
///
/// The timeout covers the wait for the response head. When it fires the
/// in-flight upstream future is dropped, which aborts the connection.
pub async fn execute(
    upstream: &dyn Upstream,
    policy: &Policy,
    request: ForwardRequest,
) -> ProxyOutcome {
    let declared = request
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = check_declared_length(declared, policy) {
        warn!(target_url = %request.target, error = ?e, "Declared body exceeds limit");
        return ProxyOutcome::PolicyRejection(e.into());
    }

    let with_body = forwards_body(&request.method);
    let limit = BodyLimit::new(policy.max_body_bytes());
    let outbound = OutboundRequest {
        headers: sanitize_outbound(&request.headers, with_body),
        body: with_body.then(|| limit.wrap(request.body)),
        method: request.method,
        url: request.target,
    };
    let target = outbound.url.clone();

    match tokio::time::timeout(policy.timeout(), upstream.send(outbound)).await {
        Ok(Ok(response)) => ProxyOutcome::Success(response),
        Err(_) => {
            warn!(
                target_url = %target,
                timeout_ms = policy.timeout().as_millis() as u64,
                "Upstream request timed out"
            );
            ProxyOutcome::Timeout
        }
        Ok(Err(_)) if limit.tripped() => {
            warn!(
                target_url = %target,
                limit = policy.max_body_bytes(),
                "Streamed body exceeds limit"
            );
            ProxyOutcome::PolicyRejection(RelayError::PayloadTooLarge)
        }
        Ok(Err(UpstreamError::RedirectRejected(reason))) => {
            ProxyOutcome::PolicyRejection(RelayError::RedirectRejected(reason.to_string()))
        }
        Ok(Err(UpstreamError::AddressRejected(reason))) => {
            ProxyOutcome::PolicyRejection(reason.into())
        }
        Ok(Err(UpstreamError::Transport(cause))) => {
            error!(target_url = %target, error = %cause, "Upstream request failed");
            ProxyOutcome::TransportFailure(cause)
        }
    }
}
