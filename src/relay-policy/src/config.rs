//! Relay policy and its resolution from overrides.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default forward timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum request body size in megabytes.
pub const DEFAULT_MAX_BODY_MB: u64 = 10;

/// Default number of redirect hops followed (each hop is re-validated).
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Domains every deployment allows. Overrides are appended, never replace these.
const BUILTIN_ALLOWED_DOMAINS: &[&str] = &[];

/// Origins every deployment allows. Overrides are appended, never replace these.
const BUILTIN_ALLOWED_ORIGINS: &[&str] = &[];

/// Raw configuration overrides, as found in the environment or a config file.
///
/// Every value is kept as the unparsed string so that resolution can apply
/// the permissive fallback rules in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PolicyOverrides {
    /// Comma-separated hostnames added to the domain allowlist.
    #[serde(default)]
    pub allowed_domains: Option<String>,

    /// Comma-separated origins (or `*`) added to the origin allowlist.
    #[serde(default)]
    pub allowed_origins: Option<String>,

    /// Forward timeout in whole seconds.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Maximum request body size in whole megabytes.
    #[serde(default)]
    pub max_body_size: Option<String>,

    /// Resolve target hosts and reject non-public addresses.
    #[serde(default)]
    pub resolve_hosts: Option<String>,

    /// Maximum redirect hops to follow.
    #[serde(default)]
    pub max_redirects: Option<String>,
}

impl PolicyOverrides {
    pub const ALLOWED_DOMAINS: &'static str = "ALLOWED_DOMAINS";
    pub const ALLOWED_ORIGINS: &'static str = "ALLOWED_ORIGINS";
    pub const TIMEOUT: &'static str = "TIMEOUT";
    pub const MAX_BODY_SIZE: &'static str = "MAX_BODY_SIZE";
    pub const RESOLVE_HOSTS: &'static str = "RESOLVE_HOSTS";
    pub const MAX_REDIRECTS: &'static str = "MAX_REDIRECTS";

    /// Collect overrides through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            allowed_domains: lookup(Self::ALLOWED_DOMAINS),
            allowed_origins: lookup(Self::ALLOWED_ORIGINS),
            timeout: lookup(Self::TIMEOUT),
            max_body_size: lookup(Self::MAX_BODY_SIZE),
            resolve_hosts: lookup(Self::RESOLVE_HOSTS),
            max_redirects: lookup(Self::MAX_REDIRECTS),
        }
    }

    /// Load overrides from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load overrides from a string map keyed by the environment names.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self::from_lookup(|key| map.get(key).cloned())
    }

    /// Fill every unset field from `other`.
    pub fn or(self, other: PolicyOverrides) -> Self {
        Self {
            allowed_domains: self.allowed_domains.or(other.allowed_domains),
            allowed_origins: self.allowed_origins.or(other.allowed_origins),
            timeout: self.timeout.or(other.timeout),
            max_body_size: self.max_body_size.or(other.max_body_size),
            resolve_hosts: self.resolve_hosts.or(other.resolve_hosts),
            max_redirects: self.max_redirects.or(other.max_redirects),
        }
    }
}

/// Immutable access policy applied to every relayed request.
///
/// Invariant: `timeout` and `max_body_bytes` are always non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    allowed_domains: Vec<String>,
    allowed_origins: Vec<String>,
    timeout: Duration,
    max_body_bytes: u64,
    resolve_hosts: bool,
    max_redirects: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allowed_domains: BUILTIN_ALLOWED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            allowed_origins: BUILTIN_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_MB * BYTES_PER_MB,
            resolve_hosts: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl Policy {
    /// Create a builder seeded with the built-in defaults.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// Resolve a policy from the built-in defaults plus overrides.
    ///
    /// Allowlist overrides are additive. Malformed or non-positive numeric
    /// overrides silently fall back to the defaults.
    pub fn resolve(overrides: &PolicyOverrides) -> Self {
        let mut builder = PolicyBuilder::new()
            .allow_domains(parse_list(overrides.allowed_domains.as_deref()))
            .allow_origins(parse_list(overrides.allowed_origins.as_deref()));

        if let Some(secs) = parse_positive(overrides.timeout.as_deref()) {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(mb) = parse_positive(overrides.max_body_size.as_deref()) {
            builder = builder.max_body_bytes(mb.saturating_mul(BYTES_PER_MB));
        }
        if let Some(flag) = parse_flag(overrides.resolve_hosts.as_deref()) {
            builder = builder.resolve_hosts(flag);
        }
        if let Some(hops) = parse_leading_int(overrides.max_redirects.as_deref())
            .and_then(|n| usize::try_from(n).ok())
        {
            builder = builder.max_redirects(hops);
        }

        builder.build()
    }

    /// Resolve a policy from the process environment.
    pub fn from_env() -> Self {
        Self::resolve(&PolicyOverrides::from_env())
    }

    /// Hostnames allowed as targets. Empty means any host.
    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Origins allowed to call the relay. Empty means any origin.
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Upper bound on waiting for the upstream response.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Maximum request body size in bytes.
    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    /// Whether targets are resolved and checked for non-public addresses.
    pub fn resolve_hosts(&self) -> bool {
        self.resolve_hosts
    }

    /// Maximum redirect hops followed.
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Check a hostname against the domain allowlist (exact, case-sensitive).
    pub fn domain_allowed(&self, host: &str) -> bool {
        self.allowed_domains.is_empty() || self.allowed_domains.iter().any(|d| d == host)
    }
}

/// Builder for [`Policy`].
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    /// Create a new builder with the built-in defaults.
    pub fn new() -> Self {
        Self {
            policy: Policy::default(),
        }
    }

    /// Add an allowed target hostname.
    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.policy.allowed_domains.push(domain.into());
        self
    }

    /// Add multiple allowed target hostnames.
    pub fn allow_domains(mut self, domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for domain in domains {
            self.policy.allowed_domains.push(domain.into());
        }
        self
    }

    /// Add an allowed caller origin (`*` allows every origin).
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.policy.allowed_origins.push(origin.into());
        self
    }

    /// Add multiple allowed caller origins.
    pub fn allow_origins(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for origin in origins {
            self.policy.allowed_origins.push(origin.into());
        }
        self
    }

    /// Set the forward timeout. A zero duration is ignored.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.policy.timeout = timeout;
        }
        self
    }

    /// Set the maximum body size in bytes. Zero is ignored.
    pub fn max_body_bytes(mut self, bytes: u64) -> Self {
        if bytes > 0 {
            self.policy.max_body_bytes = bytes;
        }
        self
    }

    /// Enable or disable DNS resolve-then-check.
    pub fn resolve_hosts(mut self, enabled: bool) -> Self {
        self.policy.resolve_hosts = enabled;
        self
    }

    /// Set the maximum number of redirect hops.
    pub fn max_redirects(mut self, hops: usize) -> Self {
        self.policy.max_redirects = hops;
        self
    }

    /// Build the policy.
    pub fn build(self) -> Policy {
        self.policy
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the leading integer of a string.
///
/// Leading whitespace and a sign are accepted and trailing garbage is
/// ignored, so `" 15s"` yields 15. Returns `None` when no digits lead.
pub fn parse_leading_int(value: Option<&str>) -> Option<i64> {
    let trimmed = value?.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let magnitude: i64 = rest[..digits_end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_positive(value: Option<&str>) -> Option<u64> {
    parse_leading_int(value)
        .filter(|n| *n > 0)
        .and_then(|n| u64::try_from(n).ok())
}

fn parse_flag(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
