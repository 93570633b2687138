//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors from a model call or from reading its output
///
/// Every variant surfaces to the workflow as an extraction failure; the
/// distinction matters for logs and for the client's own retry loop.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Model returned no content")]
    NoContent,

    #[error("Model output was cut off at the token limit")]
    Truncated,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Response did not match the expected shape: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether the transport layer may retry the same request
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            LlmError::Network(_) | LlmError::Timeout(_) => true,
            LlmError::RateLimited { .. }
            | LlmError::NoContent
            | LlmError::Truncated
            | LlmError::InvalidResponse(_)
            | LlmError::Schema(_)
            | LlmError::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> LlmError {
        LlmError::Api {
            status,
            message: "x".to_string(),
        }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(api(503).is_transient());
        assert!(api(408).is_transient());
        assert!(!api(400).is_transient());
        assert!(!api(401).is_transient());
        assert!(LlmError::Timeout(Duration::from_secs(30)).is_transient());
    }

    #[test]
    fn test_output_errors_are_not_transient() {
        assert!(!LlmError::NoContent.is_transient());
        assert!(!LlmError::Truncated.is_transient());
        assert!(!LlmError::InvalidResponse("Bad JSON".to_string()).is_transient());
        assert!(
            !LlmError::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .is_transient()
        );
    }

    #[test]
    fn test_schema_error_message() {
        let err: LlmError = serde_json::from_str::<u32>("\"nope\"").unwrap_err().into();
        assert!(err.to_string().starts_with("Response did not match the expected shape"));
    }
}
