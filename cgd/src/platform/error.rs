//! Platform API error types

use thiserror::Error;

/// Errors from the contact/campaign platform
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform rejected the payload as unprocessable (HTTP 422)
    #[error("{message}")]
    Validation { message: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("No location id in the connection context")]
    MissingTenant,
}

impl PlatformError {
    /// Whether the platform refused the content rather than the request
    pub fn is_validation(&self) -> bool {
        matches!(self, PlatformError::Validation { .. })
    }
}
