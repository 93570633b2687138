//! Clarification loop
//!
//! Asks the pending questions one at a time, folds the answers back into the
//! brief, and repeats until extraction reports nothing missing.

use tracing::{debug, info};

use super::StepContext;
use super::extract::{refine_brief, summary};
use crate::domain::{ConversationState, Phase};
use crate::error::WorkflowResult;

/// One clarification round
pub(crate) async fn clarify_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    let limit = cx.services.config.max_questions_per_round;
    let questions: Vec<String> = state.pending_questions.iter().take(limit).cloned().collect();
    debug!(count = %questions.len(), round = %state.clarification_rounds, "clarify_step: called");

    if questions.is_empty() {
        return Ok(Phase::ResolveSegment);
    }

    let total = questions.len();
    for (idx, question) in questions.iter().enumerate() {
        let prompt = format!("**Question {} of {}:** {}", idx + 1, total, question);
        let answer = cx.conversation.ask("clarification", prompt).await?;
        state.record_answer(question, &answer);
    }

    cx.conversation.thinking("Updating the campaign with your answers...").await?;
    let brief = refine_brief(cx.services, cx.tenant, state).await?;
    state.apply_brief(brief);
    state.clarification_rounds += 1;
    info!(round = %state.clarification_rounds, remaining = %state.pending_questions.len(), "Clarification round complete");

    if !state.pending_questions.is_empty()
        && let Some(max) = cx.services.config.max_clarification_rounds
        && state.clarification_rounds >= max
    {
        info!(%max, "Clarification round limit reached, proceeding on best judgment");
        state.pending_questions.clear();
        cx.conversation
            .system("I'll use my best judgment for the remaining details.")
            .await?;
    }

    if state.pending_questions.is_empty() {
        cx.conversation.say(summary(state)).await?;
        Ok(Phase::ResolveSegment)
    } else {
        Ok(Phase::Clarify)
    }
}
