//! Resolve-then-check hardening against DNS names pointing at private space.
//!
//! The textual check in [`crate::ip_validation::is_private_host`] never
//! resolves names, so `internal.example.com → 10.0.0.5` slips through it.
//! When [`crate::Policy::resolve_hosts`] is enabled the relay resolves the
//! target before forwarding and rejects it if any address is non-public.
//!
//! The same classification backs the server's connect-time resolver, so the
//! addresses actually dialed are checked too, redirect hops included.

use std::net::IpAddr;

use tracing::debug;

use super::ip_validation::is_non_public_ip;

/// Result of a DNS resolution check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsCheckResult {
    /// Every resolved address is public.
    Safe(Vec<IpAddr>),

    /// At least one resolved address is non-public.
    NonPublicIp(IpAddr),

    /// Resolution failed or returned nothing.
    ResolutionFailed(String),
}

/// Resolve `host` and classify every returned address.
pub async fn check_dns_resolution(host: &str, port: u16) -> DnsCheckResult {
    // IPv6 literals arrive bracketed from the URL parser.
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = bare.parse::<IpAddr>() {
        return classify(vec![ip]);
    }

    match tokio::net::lookup_host((bare, port)).await {
        Ok(addrs) => classify(addrs.map(|addr| addr.ip()).collect()),
        Err(e) => {
            debug!(host = %bare, error = %e, "DNS resolution failed");
            DnsCheckResult::ResolutionFailed(e.to_string())
        }
    }
}

fn classify(ips: Vec<IpAddr>) -> DnsCheckResult {
    if let Some(ip) = ips.iter().copied().find(|ip| is_non_public_ip(*ip)) {
        return DnsCheckResult::NonPublicIp(ip);
    }
    if ips.is_empty() {
        DnsCheckResult::ResolutionFailed("No addresses returned".to_string())
    } else {
        DnsCheckResult::Safe(ips)
    }
}
