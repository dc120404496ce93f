//! The relay request handler.
//!
//! Every method on every path lands here. The pipeline is:
//! preflight short-circuit, target validation, origin check, optional DNS
//! check, then forwarding through the executor and response formatting.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{Method, request::Parts},
    response::{IntoResponse, Response},
};
use relay_policy::{DnsCheckResult, PolicyError, check_dns_resolution, check_request_origin, validate_target};
use tracing::{debug, warn};
use url::Url;

use crate::cors;
use crate::error::{RelayError, RelayResult};
use crate::executor::{self, ForwardRequest};
use crate::response::relay_response;
use crate::state::AppState;

/// Handle a relay request.
pub async fn relay(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    if parts.method == Method::OPTIONS {
        let origin = cors::request_origin(&parts.headers);
        return cors::preflight(origin.as_deref(), &state.policy);
    }

    match forward(&state, parts, body).await {
        Ok(response) => response,
        Err(err) => {
            if let RelayError::Policy(reason) = &err {
                warn!(reason = %reason, "Request rejected");
            }
            err.into_response()
        }
    }
}

async fn forward(state: &AppState, parts: Parts, body: Body) -> RelayResult<Response> {
    let policy = state.policy.as_ref();
    let target = validate_target(parts.uri.query(), policy)?;

    let origin = cors::request_origin(&parts.headers).map(Cow::into_owned);
    check_request_origin(origin.as_deref(), policy)?;

    if policy.resolve_hosts() {
        check_resolved_addresses(&target).await?;
    }

    debug!(method = %parts.method, target_url = %target, "Relaying request");

    let outcome = executor::execute(
        state.upstream.as_ref(),
        policy,
        ForwardRequest {
            method: parts.method,
            target,
            headers: parts.headers,
            body,
        },
    )
    .await;

    let upstream = outcome.into_result()?;
    Ok(relay_response(upstream, origin.as_deref(), policy))
}

/// Reject targets whose hostname resolves to a non-public address.
///
/// A failed lookup is not a rejection; the transport reports it instead.
async fn check_resolved_addresses(target: &Url) -> RelayResult<()> {
    let host = target.host_str().unwrap_or_default();
    let port = target.port_or_known_default().unwrap_or(80);

    match check_dns_resolution(host, port).await {
        DnsCheckResult::NonPublicIp(ip) => {
            warn!(host = %host, ip = %ip, "Target resolves to a non-public address");
            Err(PolicyError::PrivateAddress(host.to_string()).into())
        }
        DnsCheckResult::ResolutionFailed(reason) => {
            debug!(host = %host, reason = %reason, "Pre-flight resolution failed");
            Ok(())
        }
        DnsCheckResult::Safe(_) => Ok(()),
    }
}
