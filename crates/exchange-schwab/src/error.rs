//! Error types for the Schwab integration.
//!
//! The taxonomy the rest of the pipeline depends on: transient errors are
//! retried with backoff, fatal errors (`CredentialExpired`, `Persistence`)
//! terminate the fetch loop, everything else fails the single operation.

use thiserror::Error;

/// Errors that can occur when talking to Schwab or managing its credential.
#[derive(Debug, Error)]
pub enum SchwabError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// API request failed.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from API.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error (missing env vars, bad paths).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The 7-day refresh clock has lapsed. Unrecoverable here; only the
    /// external one-shot authorization flow can mint a new credential.
    #[error(
        "refresh credential expired ({refresh_age_hours}h old): run the one-shot authorization flow to reauthorize"
    )]
    CredentialExpired {
        /// Age of the refresh credential in hours.
        refresh_age_hours: i64,
    },

    /// Credential refreshed over the network but not durably saved. Fatal:
    /// a restart would silently roll the refresh token back.
    #[error("credential persistence failed: {0}")]
    Persistence(String),
}

impl SchwabError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    pub fn rate_limit(retry_after_secs: u64) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    /// Returns true if the operation may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Returns true if the error must terminate the fetch loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CredentialExpired { .. } | Self::Persistence(_))
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_secs } => Some(*retry_after_secs),
            Self::Network(_) | Self::Timeout(_) => Some(1),
            Self::Api { status_code, .. } if *status_code >= 500 => Some(2),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SchwabError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SchwabError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Schwab operations.
pub type Result<T> = std::result::Result<T, SchwabError>;
