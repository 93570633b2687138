//! Email artifact: generation, campaign creation, and revision

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::review::{Reviewable, run_review};
use super::{StepContext, today};
use crate::domain::{ConversationState, Phase};
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::{complete_json, complete_text, strip_code_fences};

/// Merge tag for the recipient's first name, passed to templates verbatim
const FIRST_NAME_TAG: &str = "{{first_name}}";

#[derive(Debug, Deserialize)]
struct EmailDraft {
    #[serde(default)]
    campaign_name: String,
    #[serde(default)]
    subject_line: String,
    #[serde(default)]
    html: String,
}

/// Reject model output that is clearly not an HTML email
fn clean_html(raw: &str) -> WorkflowResult<String> {
    let html = strip_code_fences(raw).trim();
    if html.is_empty() || !html.contains('<') {
        return Err(WorkflowError::Extraction("the model did not return HTML".to_string()));
    }
    Ok(html.to_string())
}

/// Create phase: write the email, then create the campaign and its document
pub(crate) async fn create_artifact_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("create_artifact_step: called");
    let services = cx.services;
    cx.conversation.thinking("Writing your email...").await?;

    let business_name = if cx.tenant.location.name.is_empty() {
        "our business"
    } else {
        cx.tenant.location.name.as_str()
    };
    let system = services.render(
        "email",
        &json!({
            "business_name": business_name,
            "tenant": cx.tenant.describe(),
            "content_summary": state.content_summary,
            "audience": state.audience,
            "send_at": state.send_at,
            "today": today(),
            "first_name_tag": FIRST_NAME_TAG,
        }),
    )?;
    let draft: EmailDraft = complete_json(
        &services.llm,
        services.request(system, format!("Write the email for: {}", state.content_summary)),
    )
    .await?;
    let html = clean_html(&draft.html)?;
    let subject_line = if draft.subject_line.trim().is_empty() {
        state.content_summary.clone()
    } else {
        draft.subject_line.trim().to_string()
    };
    let campaign_name = if draft.campaign_name.trim().is_empty() {
        subject_line.clone()
    } else {
        draft.campaign_name.trim().to_string()
    };

    let campaign_id = services
        .campaigns
        .create_campaign(cx.tenant, &campaign_name, &subject_line)
        .await?;
    let document_id = services
        .campaigns
        .create_email_document(cx.tenant, &campaign_id, &html)
        .await?;
    info!(%campaign_id, %document_id, "Campaign and email document created");

    state.campaign_id = campaign_id;
    state.campaign_name = campaign_name;
    state.subject_line = subject_line;
    state.email_document_id = document_id;
    state.email_html = html;

    cx.conversation
        .ui_action(
            "open_email_editor",
            json!({ "campaignId": state.campaign_id, "emailDocumentId": state.email_document_id }),
        )
        .await?;
    cx.conversation
        .say(format!(
            "Created campaign **{}** with subject line \"{}\".",
            state.campaign_name, state.subject_line
        ))
        .await?;
    Ok(Phase::ReviewArtifact)
}

/// Review of the email document open in the editor
pub(crate) struct EmailReview;

#[async_trait]
impl Reviewable for EmailReview {
    fn label(&self) -> &'static str {
        "email"
    }

    fn render(&self, state: &ConversationState) -> String {
        format!(
            "Your email is open in the editor.\n\n**Subject:** {}\n\nReply **looks good** to continue, or tell me what to change.",
            state.subject_line
        )
    }

    async fn revise(&self, cx: &StepContext<'_>, state: &mut ConversationState, request: &str) -> WorkflowResult<()> {
        debug!(document_id = %state.email_document_id, "EmailReview::revise: called");
        let services = cx.services;
        let system = services.render(
            "revise-email",
            &json!({
                "business_name": cx.tenant.location.name,
                "tenant": cx.tenant.describe(),
                "current_html": state.email_html,
            }),
        )?;
        let text = complete_text(&services.llm, services.request(system, request)).await?;
        let html = clean_html(&text)?;

        services
            .campaigns
            .update_email_document(cx.tenant, &state.email_document_id, &html)
            .await?;
        state.email_html = html;
        state.email_revisions += 1;
        cx.conversation
            .ui_action(
                "refresh_email_document",
                json!({ "emailDocumentId": state.email_document_id }),
            )
            .await?;
        Ok(())
    }
}

/// Email review phase
pub(crate) async fn review_artifact_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("review_artifact_step: called");
    run_review(cx, state, &EmailReview).await?;
    Ok(Phase::ConfirmSchedule)
}
