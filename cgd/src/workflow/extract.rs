//! Structured extraction: free text to a campaign brief
//!
//! Both the first parse of a request and every refinement with clarification
//! answers are a single JSON-mode model call followed by local normalization.

use chrono::DateTime;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Services, StepContext, today};
use crate::domain::{CampaignBrief, ConversationState, Phase, TenantContext};
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::complete_json;

/// Parse a fresh request into a brief
pub async fn extract_brief(services: &Services, tenant: &TenantContext, request: &str) -> WorkflowResult<CampaignBrief> {
    debug!(request_len = %request.len(), "extract_brief: called");
    let system = services.render(
        "extract",
        &json!({
            "today": today(),
            "tenant": tenant.describe(),
            "timezone": tenant.timezone(),
            "max_questions": services.config.max_questions_per_round,
        }),
    )?;
    let brief: CampaignBrief = complete_json(&services.llm, services.request(system, request)).await?;
    normalize_brief(brief)
}

/// Re-extract the brief with the accumulated clarification answers
pub async fn refine_brief(
    services: &Services,
    tenant: &TenantContext,
    state: &ConversationState,
) -> WorkflowResult<CampaignBrief> {
    debug!(answers = %state.answered_questions.len(), "refine_brief: called");
    let system = services.render(
        "refine",
        &json!({
            "today": today(),
            "tenant": tenant.describe(),
            "timezone": tenant.timezone(),
            "request": state.raw_request,
            "brief": state.brief(),
            "answers": state.answered_questions,
            "max_questions": services.config.max_questions_per_round,
        }),
    )?;
    let user = "Update the campaign brief using the clarifications provided.";
    let brief: CampaignBrief = complete_json(&services.llm, services.request(system, user)).await?;
    normalize_brief(brief)
}

/// Trim fields, drop blank questions, and canonicalize the send time
fn normalize_brief(mut brief: CampaignBrief) -> WorkflowResult<CampaignBrief> {
    brief.audience = brief.audience.trim().to_string();
    brief.content_summary = brief.content_summary.trim().to_string();
    brief.segment_name = brief.segment_name.trim().to_string();
    brief.missing_info = brief
        .missing_info
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    let send_at = brief.send_at.trim();
    match DateTime::parse_from_rfc3339(send_at) {
        Ok(parsed) => brief.send_at = parsed.to_rfc3339(),
        Err(e) if brief.missing_info.is_empty() => {
            return Err(WorkflowError::Extraction(format!(
                "send time '{}' is not an ISO-8601 timestamp with offset: {}",
                send_at, e
            )));
        }
        Err(_) => {
            debug!(%send_at, "normalize_brief: send time left for clarification");
            brief.send_at = send_at.to_string();
        }
    }
    Ok(brief)
}

/// Parse phase: extract the brief and summarize it back
pub(crate) async fn parse_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("parse_step: called");
    cx.conversation.thinking("Analyzing your campaign request...").await?;

    let brief = extract_brief(cx.services, cx.tenant, &state.raw_request).await?;
    info!(missing = %brief.missing_info.len(), "Campaign request parsed");
    state.apply_brief(brief);
    cx.conversation.say(summary(state)).await?;

    if state.pending_questions.is_empty() {
        Ok(Phase::ResolveSegment)
    } else {
        if state.pending_questions.len() > cx.services.config.max_questions_per_round {
            warn!(count = %state.pending_questions.len(), "parse_step: more questions than one round allows");
        }
        Ok(Phase::Clarify)
    }
}

/// Markdown summary of the parsed fields
pub(crate) fn summary(state: &ConversationState) -> String {
    let or_pending = |value: &str| {
        if value.is_empty() {
            "_to be clarified_".to_string()
        } else {
            value.to_string()
        }
    };
    format!(
        "**Here's what I understood:**\n- **Audience:** {}\n- **Content:** {}\n- **Send at:** {}",
        or_pending(&state.audience),
        or_pending(&state.content_summary),
        or_pending(&state.send_at),
    )
}
