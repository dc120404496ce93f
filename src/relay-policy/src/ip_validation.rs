//! Private-network classification for SSRF protection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Hostnames that always name the local machine.
const LOCAL_HOSTNAMES: &[&str] = &["localhost", "0.0.0.0"];

/// Check whether a hostname targets a private or non-routable address.
///
/// This is a purely textual check, no DNS is performed. Dotted-decimal IPv4
/// literals are matched against 10/8, 172.16/12, 192.168/16, 127/8,
/// 169.254/16 and 0/8. Other hostnames are private only if they are
/// `localhost` or `0.0.0.0`. DNS names that resolve to private space and
/// IPv6 literals pass; see [`crate::dns`] for the resolving check.
pub fn is_private_host(hostname: &str) -> bool {
    if let Some(octets) = ipv4_literal_octets(hostname) {
        return match octets {
            ["10", ..] | ["127", ..] | ["0", ..] => true,
            ["192", "168", ..] | ["169", "254", ..] => true,
            ["172", second, ..] => matches!(second.parse::<u8>(), Ok(16..=31)) && second.len() == 2,
            _ => false,
        };
    }

    let lower = hostname.to_ascii_lowercase();
    LOCAL_HOSTNAMES.contains(&lower.as_str())
}

/// Split a dotted-decimal IPv4 literal into its four groups of 1-3 digits.
fn ipv4_literal_octets(hostname: &str) -> Option<[&str; 4]> {
    let mut parts = hostname.split('.');
    let octets = [parts.next()?, parts.next()?, parts.next()?, parts.next()?];
    if parts.next().is_some() {
        return None;
    }
    octets
        .iter()
        .all(|o| (1..=3).contains(&o.len()) && o.bytes().all(|b| b.is_ascii_digit()))
        .then_some(octets)
}

/// Check if a resolved IP address is non-public (private, local, reserved).
pub fn is_non_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_non_public_ipv4(ip),
        IpAddr::V6(ip) => is_non_public_ipv6(ip),
    }
}

fn is_non_public_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || a == 0
        // Shared address space (CGNAT), 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_non_public_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_non_public_ipv4(v4);
    }

    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // Unique local, fc00::/7
        || (first & 0xfe00) == 0xfc00
        // Link-local, fe80::/10
        || (first & 0xffc0) == 0xfe80
}
