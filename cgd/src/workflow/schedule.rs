//! Schedule confirmation, revision, and delivery

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::json;
use tracing::{debug, info, warn};

use super::review::{Reviewable, run_review};
use super::{StepContext, today};
use crate::domain::{ConversationState, Phase};
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::{complete_text, strip_code_fences};
use crate::platform::{PlatformError, ScheduleRequest};

/// Canonical RFC 3339 form of `text`, if it is a timestamp with offset
fn canonical_time(text: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(text.trim()).ok().map(|dt| dt.to_rfc3339())
}

/// Confirm phase: show the summary card
pub(crate) async fn confirm_schedule_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("confirm_schedule_step: called");
    cx.conversation
        .say(format!(
            "**Ready to schedule**\n- **Campaign:** {}\n- **Subject:** {}\n- {}",
            state.campaign_name,
            state.subject_line,
            state.audience_label()
        ))
        .await?;
    Ok(Phase::ReviewSchedule)
}

/// Review of the send time
pub(crate) struct ScheduleReview;

#[async_trait]
impl Reviewable for ScheduleReview {
    fn label(&self) -> &'static str {
        "schedule"
    }

    fn render(&self, state: &ConversationState) -> String {
        let when = if state.send_at.is_empty() {
            "_not set_"
        } else {
            state.send_at.as_str()
        };
        format!(
            "**Send at:** {}\n\nReply **schedule it** to confirm, or tell me a different time.",
            when
        )
    }

    async fn revise(&self, cx: &StepContext<'_>, state: &mut ConversationState, request: &str) -> WorkflowResult<()> {
        debug!(current = %state.send_at, "ScheduleReview::revise: called");
        let services = cx.services;
        let system = services.render(
            "revise-schedule",
            &json!({
                "current_schedule": state.send_at,
                "timezone": cx.tenant.timezone(),
                "today": today(),
            }),
        )?;
        let text = complete_text(&services.llm, services.request(system, request)).await?;
        let candidate = strip_code_fences(&text).trim_matches(['"', '\'', '`']).trim();
        let send_at = canonical_time(candidate).ok_or_else(|| {
            WorkflowError::Extraction(format!("'{}' is not an ISO-8601 time with offset", candidate))
        })?;

        state.send_at = send_at;
        state.schedule_revisions += 1;
        Ok(())
    }
}

/// Schedule review phase
pub(crate) async fn review_schedule_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("review_schedule_step: called");
    run_review(cx, state, &ScheduleReview).await?;
    Ok(Phase::Schedule)
}

/// Schedule phase: hand the campaign to the platform
pub(crate) async fn schedule_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!(send_at = %state.send_at, "schedule_step: called");
    let Some(send_at) = canonical_time(&state.send_at) else {
        cx.conversation
            .error(format!(
                "\"{}\" isn't a valid send time. Please give a date and time.",
                state.send_at
            ))
            .await?;
        return Ok(Phase::ReviewSchedule);
    };

    cx.conversation.thinking("Scheduling your campaign...").await?;
    let request = ScheduleRequest {
        campaign_id: state.campaign_id.clone(),
        name: state.campaign_name.clone(),
        subject_line: state.subject_line.clone(),
        send_at: send_at.clone(),
        segment_names: state.audience_list_names(),
    };
    match cx.services.campaigns.schedule_campaign(cx.tenant, &request).await {
        Ok(()) => {
            info!(campaign_id = %state.campaign_id, %send_at, "Campaign scheduled");
            state.send_at = send_at;
            cx.conversation
                .say(format!(
                    "Your campaign **{}** is scheduled for {}.",
                    state.campaign_name, state.send_at
                ))
                .await?;
            if let Some(tenant_id) = cx.tenant.tenant_id() {
                cx.conversation
                    .ui_action(
                        "navigate",
                        json!({ "path": format!("/locations/{}/campaigns", tenant_id) }),
                    )
                    .await?;
            }
            Ok(Phase::Done)
        }
        Err(PlatformError::Validation { message }) => {
            warn!(error = %message, "Schedule rejected by platform");
            cx.conversation
                .error(format!("The platform couldn't schedule the campaign: {}", message))
                .await?;
            Ok(Phase::ReviewSchedule)
        }
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::workflow::testing::{StubPlatform, rejected, scripted_human, services, tenant, ui_actions};

    fn scheduled_state() -> ConversationState {
        let mut state = ConversationState::new("x");
        state.campaign_id = "camp-1".to_string();
        state.campaign_name = "Black Friday".to_string();
        state.subject_line = "25% off".to_string();
        state.send_at = "2025-11-28T09:00:00-05:00".to_string();
        state
    }

    #[tokio::test]
    async fn test_schedule_all_customers_and_navigate() {
        let platform = StubPlatform::new();
        let services = services(MockLlmClient::from_texts(Vec::<String>::new()), platform.clone());
        let tenant = tenant();
        let (conversation, human) = scripted_human(&[]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = scheduled_state();

        assert_eq!(schedule_step(&cx, &mut state).await.unwrap(), Phase::Done);
        let scheduled = platform.scheduled.lock().unwrap().clone();
        assert!(scheduled[0].segment_names.is_empty());
        assert_eq!(scheduled[0].send_at, "2025-11-28T09:00:00-05:00");

        drop(conversation);
        let actions = ui_actions(&human.await.unwrap());
        assert_eq!(actions[0], ("navigate".to_string(), json!({"path": "/locations/42/campaigns"})));
    }

    #[tokio::test]
    async fn test_invalid_time_returns_to_review() {
        let platform = StubPlatform::new();
        let services = services(MockLlmClient::from_texts(Vec::<String>::new()), platform.clone());
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&[]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = scheduled_state();
        state.send_at = "friday morning".to_string();

        assert_eq!(schedule_step(&cx, &mut state).await.unwrap(), Phase::ReviewSchedule);
        assert!(platform.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejection_returns_to_review() {
        let platform = StubPlatform::new();
        platform.push_schedule(Err(rejected("send time is in the past")));
        let services = services(MockLlmClient::from_texts(Vec::<String>::new()), platform);
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&[]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = scheduled_state();
        state.segment_display_name = "AI - Vips".to_string();

        assert_eq!(schedule_step(&cx, &mut state).await.unwrap(), Phase::ReviewSchedule);
    }

    #[tokio::test]
    async fn test_schedule_review_rewrites_time() {
        let services = services(
            MockLlmClient::from_texts(["not a time", "\"2025-11-28T14:15:00-05:00\""]),
            StubPlatform::new(),
        );
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&["at 2pm", "2:15pm instead", "schedule it"]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = scheduled_state();

        assert_eq!(review_schedule_step(&cx, &mut state).await.unwrap(), Phase::Schedule);
        assert_eq!(state.send_at, "2025-11-28T14:15:00-05:00");
        assert_eq!(state.schedule_revisions, 1);
    }
}
