//! Network fetch error types.

use thiserror::Error;

/// Failure of a network retrieval. Delivered as a terminal outcome, never retried.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {message}")]
    Network { message: String },

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("failed to read response body: {message}")]
    Body { message: String },
}

impl FetchError {
    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates body read error.
    #[must_use]
    pub fn body(message: impl Into<String>) -> Self {
        Self::Body {
            message: message.into(),
        }
    }

    /// Returns the HTTP status for status errors.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            }
        } else if e.is_body() || e.is_decode() {
            Self::body(e.to_string())
        } else {
            Self::network(e.to_string())
        }
    }
}
