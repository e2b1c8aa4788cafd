//! Error types for the synchronization layer

use std::time::Duration;
use thiserror::Error;

/// Result type for repository and configuration operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised below the envelope boundary.
///
/// Nothing above the repository sees these directly: they are flattened into
/// `ResultEnvelope::Failure` messages before reaching a section or the
/// reconciler.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from server: {details}")]
    InvalidResponse { details: String },

    #[error("Failed to decode image: {details}")]
    Decode { details: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SyncError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout: Duration) -> Self {
        SyncError::Timeout { timeout }
    }

    /// Create an HTTP status error
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        SyncError::Status {
            status,
            body: body.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(details: impl Into<String>) -> Self {
        SyncError::InvalidResponse {
            details: details.into(),
        }
    }

    /// Create a decode error
    pub fn decode(details: impl Into<String>) -> Self {
        SyncError::Decode {
            details: details.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config {
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying for an idempotent request
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { .. } | SyncError::Timeout { .. } => true,
            SyncError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts are enforced around the whole request by the repository,
        // so a reqwest-level timeout is reported as a plain network error.
        if err.is_decode() {
            SyncError::invalid_response(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::status(status.as_u16(), err.to_string())
        } else {
            SyncError::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::invalid_response(format!("JSON parsing error: {}", err))
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::config(format!("Invalid URL: {}", err))
    }
}
