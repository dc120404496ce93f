//! Target validation and access policy for the fetch relay.
//!
//! This crate holds every decision the relay makes before a byte leaves the
//! process:
//! - Policy resolution from defaults plus environment overrides
//! - Target URL extraction and validation (protocol, domain allowlist)
//! - SSRF protection (textual private-address classification, optional DNS check)
//! - CORS origin decisions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Policy                            │
//! │  allowed_domains · allowed_origins · timeout · max_body   │
//! └──────────────────────────────────────────────────────────┘
//!        │                    │                     │
//!        ▼                    ▼                     ▼
//! ┌──────────────┐   ┌─────────────────┐   ┌────────────────┐
//! │  validator   │──▶│  ip_validation  │   │      cors      │
//! │ url → Url    │   │  dns (opt-in)   │   │ origin allowed │
//! └──────────────┘   └─────────────────┘   └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_policy::{Policy, validate_target};
//!
//! let policy = Policy::builder().allow_domain("api.example.com").build();
//!
//! let target = validate_target(Some("url=https://api.example.com/x"), &policy)?;
//! assert_eq!(target.as_str(), "https://api.example.com/x");
//! ```

pub mod config;
pub mod cors;
pub mod dns;
pub mod ip_validation;
pub mod validator;

pub use config::{Policy, PolicyBuilder, PolicyOverrides};
pub use cors::{ANY_ORIGIN, check_request_origin, preflight_allow_origin, response_allow_origin};
pub use dns::{DnsCheckResult, check_dns_resolution};
pub use ip_validation::{is_non_public_ip, is_private_host};
pub use validator::{
    check_declared_length, target_param, validate_redirect_hop, validate_target,
};

use thiserror::Error;

/// Policy violations detected while vetting a relay request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The `url` query parameter is missing or empty.
    #[error("Missing required parameter: url")]
    MissingTargetUrl,

    /// The target is not an absolute URL.
    #[error("Invalid URL format")]
    InvalidUrl,

    /// The target uses a scheme other than http or https.
    #[error("Only HTTP and HTTPS protocols are allowed")]
    UnsupportedProtocol(String),

    /// The target host is not on the domain allowlist.
    #[error("Domain {0} is not allowed")]
    DomainNotAllowed(String),

    /// The target host is a private, loopback or link-local address.
    #[error("Access to private IP addresses is not allowed")]
    PrivateAddress(String),

    /// The caller's origin is not on the origin allowlist.
    #[error("Origin {0} is not allowed")]
    OriginNotAllowed(String),

    /// The declared request body exceeds the configured maximum.
    #[error("Request body too large")]
    BodyTooLarge { declared: u64, limit: u64 },
}

impl PolicyError {
    /// HTTP status code the relay answers with for this violation.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingTargetUrl
            | Self::InvalidUrl
            | Self::UnsupportedProtocol(_)
            | Self::DomainNotAllowed(_)
            | Self::PrivateAddress(_) => 400,
            Self::OriginNotAllowed(_) => 403,
            Self::BodyTooLarge { .. } => 413,
        }
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;
