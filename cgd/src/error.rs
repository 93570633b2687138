//! Workflow error taxonomy

use thiserror::Error;

use crate::llm::LlmError;
use crate::platform::PlatformError;

/// Errors raised by workflow steps
///
/// The orchestrator decides recovery per variant: extraction failures re-enter
/// the phase, validation failures feed the creation retry controller,
/// collaborator failures end the conversation, and internal-consistency
/// failures abort it loudly.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Validation rejected: {0}")]
    Validation(String),

    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("Conversation cancelled")]
    Cancelled,

    #[error("No answer received for question {question_id}")]
    AnswerTimeout { question_id: String },
}

impl WorkflowError {
    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Extraction(_) => "extraction",
            WorkflowError::Validation(_) => "validation",
            WorkflowError::Collaborator(_) => "collaborator",
            WorkflowError::InternalConsistency(_) => "internal",
            WorkflowError::Cancelled => "cancelled",
            WorkflowError::AnswerTimeout { .. } => "timeout",
        }
    }
}

impl From<LlmError> for WorkflowError {
    fn from(err: LlmError) -> Self {
        WorkflowError::Extraction(err.to_string())
    }
}

impl From<PlatformError> for WorkflowError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Validation { message } => WorkflowError::Validation(message),
            other => WorkflowError::Collaborator(other.to_string()),
        }
    }
}

/// Result alias for workflow steps
pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_errors_are_extraction_errors() {
        let err: WorkflowError = LlmError::InvalidResponse("garbage".to_string()).into();
        assert!(matches!(err, WorkflowError::Extraction(_)));
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn test_platform_validation_maps_to_validation() {
        let err: WorkflowError = PlatformError::Validation {
            message: "unknown property".to_string(),
        }
        .into();
        assert!(matches!(err, WorkflowError::Validation(ref m) if m == "unknown property"));
    }

    #[test]
    fn test_platform_other_maps_to_collaborator() {
        let err: WorkflowError = PlatformError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "collaborator");
    }
}
