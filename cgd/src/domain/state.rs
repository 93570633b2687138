//! Per-conversation mutable state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::filter::FilterQuery;
use super::phase::Phase;
use crate::error::{WorkflowError, WorkflowResult};

/// Audience value meaning "send to everyone"
pub const ALL_CUSTOMERS: &str = "all_customers";

/// Answer recorded when the human leaves a clarification blank
pub const BEST_JUDGMENT: &str = "Not specified - please use best judgment";

/// Structured fields pulled out of a free-text request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignBrief {
    /// Who should receive the campaign
    pub audience: String,

    /// What the email should say or offer
    #[serde(alias = "contentSummary", alias = "template")]
    pub content_summary: String,

    /// When to send, ISO-8601 with offset
    #[serde(alias = "sendAt", alias = "datetime")]
    pub send_at: String,

    /// Short name for the audience segment
    #[serde(alias = "segmentName")]
    pub segment_name: String,

    /// Ambiguities that need a human answer
    #[serde(alias = "missingInfo")]
    pub missing_info: Vec<String>,
}

/// A clarification question and the human's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    pub question: String,
    pub answer: String,
}

/// An existing segment scored against the requested audience
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSegment {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub filter_query: Value,
    pub relevance_score: f64,
    pub reason: String,
}

/// Everything one conversation knows, owned by its orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub raw_request: String,

    pub audience: String,
    pub content_summary: String,
    pub send_at: String,
    pub segment_name: String,

    pub pending_questions: Vec<String>,
    pub answered_questions: Vec<AnsweredQuestion>,
    pub clarification_rounds: u32,

    pub matched_segments: Vec<MatchedSegment>,

    pub segment_id: String,
    pub segment_display_name: String,
    pub is_new_segment: bool,

    pub filter_query: FilterQuery,
    pub creation_attempts: u32,
    pub last_creation_error: String,
    pub last_rejected_query: Option<FilterQuery>,

    pub campaign_id: String,
    pub campaign_name: String,
    pub email_document_id: String,
    pub email_html: String,
    pub subject_line: String,

    pub segment_revisions: u32,
    pub email_revisions: u32,
    pub schedule_revisions: u32,

    pub phase: Phase,
}

impl ConversationState {
    pub fn new(raw_request: impl Into<String>) -> Self {
        let raw_request = raw_request.into();
        debug!(request_len = %raw_request.len(), "ConversationState::new: called");
        Self {
            raw_request,
            audience: String::new(),
            content_summary: String::new(),
            send_at: String::new(),
            segment_name: String::new(),
            pending_questions: Vec::new(),
            answered_questions: Vec::new(),
            clarification_rounds: 0,
            matched_segments: Vec::new(),
            segment_id: String::new(),
            segment_display_name: String::new(),
            is_new_segment: false,
            filter_query: FilterQuery::default(),
            creation_attempts: 0,
            last_creation_error: String::new(),
            last_rejected_query: None,
            campaign_id: String::new(),
            campaign_name: String::new(),
            email_document_id: String::new(),
            email_html: String::new(),
            subject_line: String::new(),
            segment_revisions: 0,
            email_revisions: 0,
            schedule_revisions: 0,
            phase: Phase::Parse,
        }
    }

    /// Overwrite the parsed fields from a fresh extraction
    pub fn apply_brief(&mut self, brief: CampaignBrief) {
        debug!(missing = %brief.missing_info.len(), "ConversationState::apply_brief: called");
        self.audience = brief.audience;
        self.content_summary = brief.content_summary;
        self.send_at = brief.send_at;
        self.segment_name = brief.segment_name;
        self.pending_questions = brief.missing_info;
    }

    /// Current parsed fields as a brief, for refinement prompts
    pub fn brief(&self) -> CampaignBrief {
        CampaignBrief {
            audience: self.audience.clone(),
            content_summary: self.content_summary.clone(),
            send_at: self.send_at.clone(),
            segment_name: self.segment_name.clone(),
            missing_info: self.pending_questions.clone(),
        }
    }

    /// Record an answer, replacing any earlier answer to the same question
    pub fn record_answer(&mut self, question: &str, answer: &str) {
        let answer = if answer.trim().is_empty() {
            BEST_JUDGMENT.to_string()
        } else {
            answer.trim().to_string()
        };
        match self.answered_questions.iter_mut().find(|a| a.question == question) {
            Some(existing) => existing.answer = answer,
            None => self.answered_questions.push(AnsweredQuestion {
                question: question.to_string(),
                answer,
            }),
        }
    }

    /// Whether the audience means everyone
    pub fn targets_all_customers(&self) -> bool {
        self.audience.trim().eq_ignore_ascii_case(ALL_CUSTOMERS)
    }

    /// Adopt an existing segment as the campaign audience
    pub fn adopt_segment(&mut self, id: &str, display_name: &str) {
        debug!(%id, %display_name, "ConversationState::adopt_segment: called");
        self.segment_id = id.to_string();
        self.segment_display_name = display_name.to_string();
        self.is_new_segment = false;
    }

    /// Record a freshly created segment and reset retry bookkeeping
    pub fn record_created_segment(&mut self, id: &str, display_name: &str) {
        debug!(%id, %display_name, "ConversationState::record_created_segment: called");
        self.segment_id = id.to_string();
        self.segment_display_name = display_name.to_string();
        self.is_new_segment = true;
        self.creation_attempts = 0;
        self.last_creation_error.clear();
        self.last_rejected_query = None;
    }

    /// Drop any segment so the campaign goes to every contact
    pub fn clear_segment(&mut self) {
        debug!("ConversationState::clear_segment: called");
        self.segment_id.clear();
        self.segment_display_name.clear();
        self.is_new_segment = false;
        self.filter_query = FilterQuery::default();
    }

    /// Segment names the campaign is scheduled to; empty means all customers
    pub fn audience_list_names(&self) -> Vec<String> {
        if self.segment_display_name.is_empty() {
            Vec::new()
        } else {
            vec![self.segment_display_name.clone()]
        }
    }

    /// Text describing who receives the campaign
    pub fn audience_label(&self) -> String {
        if self.segment_display_name.is_empty() {
            "**Audience:** All customers".to_string()
        } else {
            format!("**Audience:** {}", self.segment_display_name)
        }
    }

    /// Check the structural invariants that must hold between steps
    pub fn check_invariants(&self, max_creation_attempts: u32) -> WorkflowResult<()> {
        if !self.pending_questions.is_empty() && !self.phase.is_clarification() {
            return Err(WorkflowError::InternalConsistency(format!(
                "{} pending questions while in phase {}",
                self.pending_questions.len(),
                self.phase
            )));
        }
        if self.phase == Phase::CreateSegment && self.creation_attempts >= max_creation_attempts {
            return Err(WorkflowError::InternalConsistency(format!(
                "segment creation scheduled after {} failed attempts",
                self.creation_attempts
            )));
        }
        Ok(())
    }
}

/// Default display name for a generated segment: "AI - " plus the first four
/// words of the short name, title-cased
pub fn default_segment_display_name(segment_name: &str, audience: &str) -> String {
    let source = if segment_name.trim().is_empty() {
        audience
    } else {
        segment_name
    };
    let words: Vec<String> = source
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .take(4)
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "AI - New Segment".to_string()
    } else {
        format!("AI - {}", words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(missing: &[&str]) -> CampaignBrief {
        CampaignBrief {
            audience: "contacts in New York".to_string(),
            content_summary: "Black Friday discount".to_string(),
            send_at: "2025-11-28T09:00:00-05:00".to_string(),
            segment_name: "new york contacts".to_string(),
            missing_info: missing.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_apply_brief_overwrites_fields() {
        let mut state = ConversationState::new("Black Friday sale");
        state.apply_brief(brief(&["What discount?"]));
        assert_eq!(state.audience, "contacts in New York");
        assert_eq!(state.pending_questions, vec!["What discount?"]);

        state.apply_brief(CampaignBrief::default());
        assert!(state.audience.is_empty());
        assert!(state.pending_questions.is_empty());
    }

    #[test]
    fn test_record_answer_blank_uses_sentinel() {
        let mut state = ConversationState::new("x");
        state.record_answer("When?", "   ");
        state.record_answer("Who?", "VIPs");
        assert_eq!(state.answered_questions[0].answer, BEST_JUDGMENT);
        assert_eq!(state.answered_questions[1].answer, "VIPs");

        state.record_answer("When?", "Friday");
        assert_eq!(state.answered_questions.len(), 2);
        assert_eq!(state.answered_questions[0].answer, "Friday");
    }

    #[test]
    fn test_invariant_pending_questions_outside_clarify() {
        let mut state = ConversationState::new("x");
        state.pending_questions = vec!["When?".to_string()];
        state.phase = Phase::Clarify;
        assert!(state.check_invariants(3).is_ok());

        state.phase = Phase::ResolveSegment;
        assert!(matches!(
            state.check_invariants(3),
            Err(WorkflowError::InternalConsistency(_))
        ));
    }

    #[test]
    fn test_invariant_creation_attempts() {
        let mut state = ConversationState::new("x");
        state.phase = Phase::CreateSegment;
        state.creation_attempts = 2;
        assert!(state.check_invariants(3).is_ok());
        state.creation_attempts = 3;
        assert!(state.check_invariants(3).is_err());
        state.phase = Phase::ManualFallback;
        assert!(state.check_invariants(3).is_ok());
    }

    #[test]
    fn test_record_created_segment_resets_attempts() {
        let mut state = ConversationState::new("x");
        state.creation_attempts = 2;
        state.last_creation_error = "bad".to_string();
        state.record_created_segment("seg-1", "AI - Vips");
        assert_eq!(state.creation_attempts, 0);
        assert!(state.last_creation_error.is_empty());
        assert!(state.is_new_segment);
        assert_eq!(state.audience_list_names(), vec!["AI - Vips"]);
    }

    #[test]
    fn test_all_customers_detection() {
        let mut state = ConversationState::new("x");
        state.audience = "ALL_CUSTOMERS".to_string();
        assert!(state.targets_all_customers());
        state.audience = "customers in all states".to_string();
        assert!(!state.targets_all_customers());
    }

    #[test]
    fn test_default_segment_display_name() {
        assert_eq!(
            default_segment_display_name("new york black friday shoppers extra", ""),
            "AI - New York Black Friday"
        );
        assert_eq!(default_segment_display_name("", "lapsed_VIP members"), "AI - Lapsed Vip Members");
        assert_eq!(default_segment_display_name("", ""), "AI - New Segment");
    }
}
