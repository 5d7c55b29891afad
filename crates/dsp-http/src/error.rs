//! HTTP client error types

use thiserror::Error;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, HttpError>;

/// HTTP client errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network request failed
    #[error("Network request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid proxy configuration
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxy(String),

    /// HTTP error status
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        status: reqwest::StatusCode,
        message: String,
    },

    /// Retry limit exceeded
    #[error("Retry limit exceeded after {attempts} attempts: {last_error}")]
    RetryLimitExceeded { attempts: u32, last_error: String },

    /// Request body could not be encoded
    #[error("Failed to encode request body: {0}")]
    Body(#[from] serde_json::Error),

    /// Client build error
    #[error("Failed to build HTTP client: {0}")]
    BuildError(String),
}

impl HttpError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::RequestFailed(e) => e.is_timeout() || e.is_connect(),
            HttpError::Timeout(_) => true,
            HttpError::HttpStatus { status, .. } => {
                // 5xx and 429 only; other 4xx mean the receiver rejected the payload
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = HttpError::HttpStatus {
            status: reqwest::StatusCode::BAD_GATEWAY,
            message: String::new(),
        };
        assert!(err.is_retryable());

        let err = HttpError::HttpStatus {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            message: String::new(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = HttpError::HttpStatus {
            status: reqwest::StatusCode::NOT_FOUND,
            message: String::new(),
        };
        assert!(!err.is_retryable());
        assert!(!HttpError::InvalidUrl("x".to_string()).is_retryable());
    }
}
