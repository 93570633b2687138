//! Conversation phases

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Where a conversation is in the campaign workflow
///
/// The orchestrator routes on this value with an exhaustive match, so a new
/// phase cannot be added without wiring a step for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Parse,
    Clarify,
    ResolveSegment,
    SelectSegment,
    ConfirmCreate,
    GenerateQuery,
    CreateSegment,
    ReviewSegment,
    RetryCreate,
    ManualFallback,
    CreateArtifact,
    ReviewArtifact,
    ConfirmSchedule,
    ReviewSchedule,
    Schedule,
    Done,
    Cancelled,
}

impl Phase {
    pub const ALL: [Phase; 17] = [
        Phase::Parse,
        Phase::Clarify,
        Phase::ResolveSegment,
        Phase::SelectSegment,
        Phase::ConfirmCreate,
        Phase::GenerateQuery,
        Phase::CreateSegment,
        Phase::ReviewSegment,
        Phase::RetryCreate,
        Phase::ManualFallback,
        Phase::CreateArtifact,
        Phase::ReviewArtifact,
        Phase::ConfirmSchedule,
        Phase::ReviewSchedule,
        Phase::Schedule,
        Phase::Done,
        Phase::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Parse => "parse",
            Phase::Clarify => "clarify",
            Phase::ResolveSegment => "resolve-segment",
            Phase::SelectSegment => "select-segment",
            Phase::ConfirmCreate => "confirm-create",
            Phase::GenerateQuery => "generate-query",
            Phase::CreateSegment => "create-segment",
            Phase::ReviewSegment => "review-segment",
            Phase::RetryCreate => "retry-create",
            Phase::ManualFallback => "manual-fallback",
            Phase::CreateArtifact => "create-artifact",
            Phase::ReviewArtifact => "review-artifact",
            Phase::ConfirmSchedule => "confirm-schedule",
            Phase::ReviewSchedule => "review-schedule",
            Phase::Schedule => "schedule",
            Phase::Done => "done",
            Phase::Cancelled => "cancelled",
        }
    }

    /// Done and Cancelled end the conversation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled)
    }

    /// Phases allowed to hold unanswered clarification items
    pub fn is_clarification(&self) -> bool {
        matches!(self, Phase::Parse | Phase::Clarify)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| WorkflowError::InternalConsistency(format!("unknown phase '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_string_roundtrip() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
            assert_eq!(serde_json::to_string(&phase).unwrap(), format!("\"{}\"", phase));
        }
    }

    #[test]
    fn test_unknown_phase_is_internal_error() {
        let err = "publish-now".parse::<Phase>().unwrap_err();
        assert!(matches!(err, WorkflowError::InternalConsistency(_)));
    }

    #[test]
    fn test_terminal_and_clarification_sets() {
        let terminal: Vec<_> = Phase::ALL.into_iter().filter(Phase::is_terminal).collect();
        assert_eq!(terminal, vec![Phase::Done, Phase::Cancelled]);
        assert!(Phase::Clarify.is_clarification());
        assert!(!Phase::ResolveSegment.is_clarification());
    }
}
