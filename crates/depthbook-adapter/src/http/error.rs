/*
[INPUT]:  Error sources (HTTP, venue responses, serialization, WebSocket)
[OUTPUT]: Structured error types with classification and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Default wait when a rate-limit response carries no `Retry-After`.
pub const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 1;

/// Main error type for the depth adapter
#[derive(Error, Debug)]
pub enum DepthError {
    /// HTTP request failed (connect, TLS, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Venue returned a non-success status
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Payload did not match the expected schema or violated a domain rule
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimit { retry_after: u64 },

    /// Request exceeded its deadline
    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Coarse classification used by retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    RateLimited,
    Malformed,
    Other,
}

impl DepthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DepthError::Http(err) if err.is_decode() => ErrorKind::Malformed,
            DepthError::Http(_)
            | DepthError::Timeout { .. }
            | DepthError::WebSocket(_)
            | DepthError::Api { .. } => ErrorKind::Network,
            DepthError::RateLimit { .. } => ErrorKind::RateLimited,
            DepthError::Malformed(_) | DepthError::Serialization(_) => ErrorKind::Malformed,
            DepthError::UrlParse(_) | DepthError::Config(_) => ErrorKind::Other,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::Malformed
        )
    }

    /// Server-mandated retry delay in seconds, if any
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            DepthError::RateLimit { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        DepthError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        DepthError::Malformed(message.into())
    }
}

/// Result type alias for depth adapter operations
pub type Result<T> = std::result::Result<T, DepthError>;
