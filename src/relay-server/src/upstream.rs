//! Outbound transport to relay targets.
//!
//! The executor talks to targets through the [`Upstream`] trait so the
//! pipeline can be driven without a network. [`ReqwestUpstream`] is the
//! production implementation: it streams bodies in both directions and
//! re-validates every redirect hop against the relay policy. With
//! `RESOLVE_HOSTS` enabled its resolver also refuses to hand the connector
//! any non-public address, so the check covers every hop and every connect.

use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use futures::StreamExt;
use relay_policy::{
    DnsCheckResult, Policy, PolicyError, check_dns_resolution, is_non_public_ip,
    validate_redirect_hop,
};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Boxed error accepted by body streams.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A sanitized request ready to be sent to a target.
#[derive(Debug)]
pub struct OutboundRequest {
    /// Request method, forwarded unchanged.
    pub method: Method,
    /// Validated absolute target.
    pub url: Url,
    /// Sanitized request headers.
    pub headers: HeaderMap,
    /// Request body; `None` for GET and HEAD.
    pub body: Option<Body>,
}

/// Response head and streaming body received from a target.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

/// Errors raised by an [`Upstream`].
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// A redirect pointed at a target the policy rejects.
    #[error("{0}")]
    RedirectRejected(PolicyError),

    /// The target host resolved to a non-public address at connect time.
    #[error("{0}")]
    AddressRejected(PolicyError),

    /// Any other transport failure (DNS, connect, TLS, protocol, body).
    #[error("{0}")]
    Transport(String),
}

/// Transport used to reach relay targets.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send a request and return once the response head has arrived.
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Redirect hop rejected by the relay policy.
#[derive(Debug, Error)]
#[error("{0}")]
struct RedirectBlocked(PolicyError);

/// Redirect chain longer than the policy allows.
#[derive(Debug, Error)]
#[error("too many redirects (limit {0})")]
struct TooManyRedirects(usize);

/// A hostname resolved to an address outside public space.
#[derive(Debug, Error)]
#[error("{host} resolves to non-public address {ip}")]
pub struct NonPublicAddress {
    pub host: String,
    pub ip: IpAddr,
}

/// Resolver that only yields public addresses.
///
/// Installed on the client when the policy resolves hosts. Every lookup the
/// connector makes goes through it, including the ones for redirect hops.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_addrs(name.as_str().to_string()))
    }
}

async fn resolve_addrs(host: String) -> Result<Addrs, BoxError> {
    let addrs = resolve_public(&host).await?;
    Ok(Box::new(addrs.into_iter()))
}

/// Resolve `host` and fail if any of its addresses is non-public.
///
/// Ports are left at zero; the connector fills in the target's port.
pub async fn resolve_public(host: &str) -> Result<Vec<SocketAddr>, BoxError> {
    match check_dns_resolution(host, 0).await {
        DnsCheckResult::Safe(ips) => Ok(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect()),
        DnsCheckResult::NonPublicIp(ip) => {
            warn!(host = %host, ip = %ip, "Connect target resolves to a non-public address");
            Err(Box::new(NonPublicAddress {
                host: host.to_string(),
                ip,
            }))
        }
        DnsCheckResult::ResolutionFailed(reason) => Err(reason.into()),
    }
}

/// IP literals never reach the resolver, so they are checked on the URL.
fn non_public_literal(url: &Url) -> Option<IpAddr> {
    let ip = match url.host()? {
        url::Host::Ipv4(ip) => IpAddr::V4(ip),
        url::Host::Ipv6(ip) => IpAddr::V6(ip),
        url::Host::Domain(_) => return None,
    };
    is_non_public_ip(ip).then_some(ip)
}

/// reqwest-backed [`Upstream`].
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    /// Build a client whose redirect handling enforces `policy`.
    ///
    /// With `max_redirects == 0` redirects are returned to the caller
    /// untouched instead of being followed. When the policy resolves hosts
    /// the client uses [`PublicResolver`] and redirect hops to non-public IP
    /// literals are rejected as well.
    pub fn new(policy: Arc<Policy>) -> Result<Self, reqwest::Error> {
        let resolve_hosts = policy.resolve_hosts();
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            let max = policy.max_redirects();
            if max == 0 {
                return attempt.stop();
            }
            if attempt.previous().len() > max {
                return attempt.error(TooManyRedirects(max));
            }
            let mut checked = validate_redirect_hop(attempt.url(), &policy);
            if checked.is_ok() && resolve_hosts && non_public_literal(attempt.url()).is_some() {
                let host = attempt.url().host_str().unwrap_or_default().to_string();
                checked = Err(PolicyError::PrivateAddress(host));
            }
            match checked {
                Ok(()) => attempt.follow(),
                Err(e) => {
                    warn!(target_url = %attempt.url(), reason = %e, "Redirect hop rejected");
                    attempt.error(RedirectBlocked(e))
                }
            }
        });

        let mut builder = reqwest::Client::builder()
            .redirect(redirect)
            .tcp_nodelay(true);
        if resolve_hosts {
            builder = builder.dns_resolver(Arc::new(PublicResolver));
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Upstream for ReqwestUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, UpstreamError> {
        debug!(method = %request.method, target_url = %request.url, "Forwarding request");
        let target = request.url.clone();

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(e, &target))?;

        let status = response.status();
        let headers = response.headers().clone();
        debug!(status = %status, "Upstream responded");

        Ok(UpstreamResponse {
            status,
            headers,
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}

fn classify_error(err: reqwest::Error, target: &Url) -> UpstreamError {
    if let Some(RedirectBlocked(reason)) = find_source::<RedirectBlocked>(&err) {
        return UpstreamError::RedirectRejected(reason.clone());
    }
    if let Some(blocked) = find_source::<NonPublicAddress>(&err) {
        let reason = PolicyError::PrivateAddress(blocked.host.clone());
        // reqwest reports the URL of the hop that failed.
        return match err.url() {
            Some(failed) if failed != target => UpstreamError::RedirectRejected(reason),
            _ => UpstreamError::AddressRejected(reason),
        };
    }
    UpstreamError::Transport(error_chain(&err))
}

fn find_source<'a, E: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a E> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}

/// Byte budget enforced on a streamed request body.
///
/// The wrapped stream fails once more than `limit` bytes have passed, and
/// the budget remembers that it tripped so the caller can tell an oversized
/// body apart from a transport failure.
#[derive(Debug, Clone)]
pub struct BodyLimit {
    limit: u64,
    tripped: Arc<AtomicBool>,
}

/// Streamed request body exceeded its byte budget.
#[derive(Debug, Error)]
#[error("request body exceeds {0} bytes")]
pub struct BodyLimitExceeded(pub u64);

impl BodyLimit {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            tripped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a wrapped body has exceeded the limit.
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Wrap `body` so that it errors past the byte budget.
    pub fn wrap(&self, body: Body) -> Body {
        let limit = self.limit;
        let tripped = Arc::clone(&self.tripped);
        let mut seen: u64 = 0;

        let stream = body.into_data_stream().map(move |chunk| {
            let chunk = chunk.map_err(|e| -> BoxError { Box::new(e) })?;
            seen = seen.saturating_add(chunk.len() as u64);
            if seen > limit {
                tripped.store(true, Ordering::Release);
                return Err(Box::new(BodyLimitExceeded(limit)) as BoxError);
            }
            Ok(chunk)
        });

        Body::from_stream(stream)
    }
}
