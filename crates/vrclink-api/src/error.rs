//! Error types for the REST client.

use thiserror::Error;

use crate::location::LocationError;

/// Errors that can occur when talking to the VRChat API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No session token is available (not logged in, or logged out).
    #[error("not authenticated")]
    NotAuthenticated,

    /// Login succeeded but a two-factor code is required to finish it.
    #[error("two-factor authentication required")]
    MfaRequired,

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resource not found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Rate limited.
    #[error("rate limited{}", match (endpoint, retry_after_secs) {
        (Some(ep), Some(secs)) => format!(" on {} (retry after {}s)", ep, secs),
        (Some(ep), None) => format!(" on {}", ep),
        (None, Some(secs)) => format!(" (retry after {}s)", secs),
        (None, None) => String::new(),
    })]
    RateLimited {
        /// The endpoint that was rate limited (optional).
        endpoint: Option<String>,
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Non-success status with the server's error message.
    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Location string could not be parsed.
    #[error(transparent)]
    Location(#[from] LocationError),
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_connect() || e.is_timeout(),
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
