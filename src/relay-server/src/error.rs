//! Error types for the relay server.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use relay_policy::PolicyError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cors;

/// Message returned for any internal fault; details stay in the server log.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The request violated the relay policy.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The upstream did not answer within the configured timeout.
    #[error("Request timeout")]
    Timeout,

    /// The upstream could not be reached (DNS, connect, TLS, protocol).
    #[error("Failed to fetch target URL")]
    UpstreamFailed,

    /// The upstream redirected to a target the policy rejects.
    #[error("Redirect target rejected: {0}")]
    RedirectRejected(String),

    /// The streamed request body exceeded the configured maximum.
    #[error("Request body too large")]
    PayloadTooLarge,
}

impl RelayError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Policy(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::UpstreamFailed | Self::RedirectRejected(_) => StatusCode::BAD_GATEWAY,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Message shown to the caller.
    pub fn public_message(&self) -> String {
        self.to_string()
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable cause.
    pub error: String,
    /// ISO-8601 UTC time the error was produced.
    pub timestamp: String,
}

impl ErrorBody {
    /// Create an error body stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Build the JSON error envelope with the permissive CORS headers.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let mut response = (status, Json(ErrorBody::new(message))).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    cors::apply_error_headers(headers);
    response
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), self.public_message())
    }
}

/// Result type for the relay server.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            RelayError::from(PolicyError::MissingTargetUrl).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::from(PolicyError::OriginNotAllowed("https://bad.com".into())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(RelayError::Timeout.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(RelayError::UpstreamFailed.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            RelayError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_policy_message_passes_through() {
        let err = RelayError::from(PolicyError::DomainNotAllowed("evil.com".into()));
        assert_eq!(err.public_message(), "Domain evil.com is not allowed");
    }

    #[test]
    fn test_timestamp_format() {
        let body = ErrorBody::new("x");
        assert!(body.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&body.timestamp).is_ok());
        // 2024-01-01T00:00:00.000Z
        assert_eq!(body.timestamp.len(), 24);
    }

    #[test]
    fn test_error_response_headers() {
        let response = RelayError::Timeout.into_response();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
