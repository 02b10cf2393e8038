//! Error types for the telemetry mirror

use thiserror::Error;

/// Main error type for mirror operations
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Transport failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Mirror answered with a non-success status
    #[error("Mirror returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Message from the response body, if any
        message: String,
    },

    /// Response body has an unexpected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid base URL
    #[error("Invalid mirror URL: {0}")]
    InvalidUrl(String),
}

impl MirrorError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            MirrorError::Http(_) => "HTTP_ERROR",
            MirrorError::Status { .. } => "STATUS_ERROR",
            MirrorError::UnexpectedResponse(_) => "UNEXPECTED_RESPONSE",
            MirrorError::InvalidUrl(_) => "INVALID_URL",
        }
    }
}

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_code() {
        let err = MirrorError::Status {
            status: 503,
            message: "busy".into(),
        };
        assert_eq!(err.error_code(), "STATUS_ERROR");

        let err = MirrorError::Status {
            status: 400,
            message: "Data not provided".into(),
        };
        assert!(err.to_string().contains("Data not provided"));
    }
}
