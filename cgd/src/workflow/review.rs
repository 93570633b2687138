//! Generic review loop
//!
//! Presents an artifact, then either accepts it on an affirmative reply or
//! applies the reply as a change request and presents it again. Segment
//! filters, the email and the send time all go through this one loop.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{StepContext, normalize_reply};
use crate::domain::ConversationState;
use crate::error::{WorkflowError, WorkflowResult};

/// Replies that accept the artifact as shown
const AFFIRMATIVES: [&str; 11] = [
    "yes",
    "good",
    "go ahead",
    "looks good",
    "perfect",
    "done",
    "ok",
    "okay",
    "confirm",
    "schedule it",
    "schedule",
];

/// Whether a reply accepts the artifact
pub fn is_affirmative(reply: &str) -> bool {
    AFFIRMATIVES.contains(&normalize_reply(reply).as_str())
}

/// An artifact the human can iterate on
#[async_trait]
pub trait Reviewable: Send + Sync {
    /// Short name used in question ids
    fn label(&self) -> &'static str;

    /// Current artifact as shown to the human, including what to reply
    fn render(&self, state: &ConversationState) -> String;

    /// Apply a change request; `state` must be left untouched on error
    async fn revise(&self, cx: &StepContext<'_>, state: &mut ConversationState, request: &str) -> WorkflowResult<()>;
}

/// Run the review loop until the human accepts; returns the number of revisions
pub async fn run_review(
    cx: &StepContext<'_>,
    state: &mut ConversationState,
    reviewer: &dyn Reviewable,
) -> WorkflowResult<u32> {
    let kind = format!("review_{}", reviewer.label());
    debug!(%kind, "run_review: called");
    let mut revisions = 0u32;

    loop {
        let reply = cx.conversation.ask(&kind, reviewer.render(state)).await?;
        if is_affirmative(&reply) {
            info!(label = %reviewer.label(), %revisions, "Artifact accepted");
            return Ok(revisions);
        }
        if reply.trim().is_empty() {
            debug!("run_review: blank reply, presenting again");
            continue;
        }

        cx.conversation.thinking("Applying your changes...").await?;
        match reviewer.revise(cx, state, reply.trim()).await {
            Ok(()) => revisions += 1,
            Err(e @ (WorkflowError::Extraction(_) | WorkflowError::Validation(_) | WorkflowError::Collaborator(_))) => {
                warn!(label = %reviewer.label(), kind = %e.kind(), error = %e, "run_review: revision failed");
                cx.conversation
                    .error(format!("I couldn't apply that change: {}", e))
                    .await?;
                continue;
            }
            Err(e) => return Err(e),
        }

        if let Some(max) = cx.services.config.max_review_rounds
            && revisions >= max
        {
            info!(label = %reviewer.label(), %max, "Review round limit reached, accepting current version");
            cx.conversation
                .system("That's the last revision for this step; continuing with the current version.")
                .await?;
            return Ok(revisions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::workflow::testing::{StubPlatform, scripted_human, services, tenant, texts};

    /// Appends the request to the subject line; "fail" is rejected
    struct SubjectReview;

    #[async_trait]
    impl Reviewable for SubjectReview {
        fn label(&self) -> &'static str {
            "subject"
        }

        fn render(&self, state: &ConversationState) -> String {
            format!("Subject: {}", state.subject_line)
        }

        async fn revise(
            &self,
            _cx: &StepContext<'_>,
            state: &mut ConversationState,
            request: &str,
        ) -> WorkflowResult<()> {
            if request == "fail" {
                return Err(WorkflowError::Extraction("model said no".to_string()));
            }
            if request == "explode" {
                return Err(WorkflowError::InternalConsistency("broken".to_string()));
            }
            state.subject_line.push_str(request);
            Ok(())
        }
    }

    #[test]
    fn test_is_affirmative() {
        for reply in ["yes", "Looks good!", "  OK. ", "schedule it", "Perfect", "go ahead"] {
            assert!(is_affirmative(reply), "{}", reply);
        }
        for reply in ["no", "make it shorter", "yes but shorter", ""] {
            assert!(!is_affirmative(reply), "{}", reply);
        }
    }

    #[tokio::test]
    async fn test_revise_until_affirmative() {
        let services = services(MockLlmClient::from_texts(Vec::<String>::new()), StubPlatform::new());
        let tenant = tenant();
        let (conversation, human) = scripted_human(&[" A", "fail", " B", "looks good"]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");

        let revisions = run_review(&cx, &mut state, &SubjectReview).await.unwrap();
        assert_eq!(revisions, 2);
        assert_eq!(state.subject_line, "AB");

        drop(conversation);
        let transcript = human.await.unwrap();
        assert_eq!(texts(&transcript, "error").len(), 1);
        let ids: Vec<_> = transcript.iter().filter_map(|m| m.question_id()).collect();
        assert_eq!(ids, vec!["review_subject_1", "review_subject_2", "review_subject_3", "review_subject_4"]);
    }

    #[tokio::test]
    async fn test_internal_errors_propagate() {
        let services = services(MockLlmClient::from_texts(Vec::<String>::new()), StubPlatform::new());
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&["explode"]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");

        let err = run_review(&cx, &mut state, &SubjectReview).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InternalConsistency(_)));
    }

    #[tokio::test]
    async fn test_round_cap_accepts_current() {
        let mut services = services(MockLlmClient::from_texts(Vec::<String>::new()), StubPlatform::new());
        services.config.max_review_rounds = Some(2);
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&["1", "2", "3"]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");

        assert_eq!(run_review(&cx, &mut state, &SubjectReview).await.unwrap(), 2);
        assert_eq!(state.subject_line, "12");
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let services = services(MockLlmClient::from_texts(Vec::<String>::new()), StubPlatform::new());
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&[]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");

        let err = run_review(&cx, &mut state, &SubjectReview).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
    }
}
