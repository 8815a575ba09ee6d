//! Error types for the Cascade SDK.

use cascade_core::InvocationId;
use serde::{Deserialize, Serialize};

/// Result type for SDK operations.
pub type CascadeResult<T> = Result<T, CascadeError>;

/// Error types that can occur when using the Cascade SDK.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        details: Option<String>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server gave up waiting for an invocation; it keeps running.
    #[error("Timed out: {message}")]
    Timeout {
        message: String,
        invocation_id: Option<InvocationId>,
    },

    /// Graph, invocation or node not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Graph name already registered.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl CascadeError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Create an error from a status code and response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let (message, details, invocation_id) = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(error_response) => (
                error_response.error,
                error_response.details,
                error_response.invocation_id,
            ),
            Err(_) => (body.to_string(), None, None),
        };

        match status {
            404 => Self::NotFound(message),
            408 => Self::Timeout {
                message,
                invocation_id,
            },
            409 => Self::Conflict(message),
            429 => Self::RateLimited,
            _ => Self::Api {
                status,
                message,
                details,
            },
        }
    }
}

/// Error response from the Cascade API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
}
