//! Segment creation with bounded retries and a manual fallback
//!
//! A validation rejection from the platform asks the human for a fuller
//! audience description and regenerates the query. After the configured number
//! of failed attempts the human creates the segment themselves and names it.

use serde_json::json;
use tracing::{debug, info, warn};

use super::StepContext;
use crate::domain::{ConversationState, Phase, default_segment_display_name};
use crate::error::WorkflowResult;
use crate::platform::{PlatformError, Segment};
use crate::session::ChoiceOption;

/// Create phase: persist the current filter query as a segment
pub(crate) async fn create_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    let max = cx.services.config.max_creation_attempts;
    let display_name = default_segment_display_name(&state.segment_name, &state.audience);
    debug!(%display_name, attempts = %state.creation_attempts, "create_step: called");

    cx.conversation
        .thinking(format!("Creating segment \"{}\"...", display_name))
        .await?;
    match cx
        .services
        .segments
        .create_segment(cx.tenant, &display_name, &state.filter_query)
        .await
    {
        Ok(segment) => {
            let name = if segment.display_name.is_empty() {
                display_name
            } else {
                segment.display_name
            };
            info!(segment_id = %segment.id, %name, "Segment created");
            state.record_created_segment(&segment.id, &name);
            cx.conversation.say(format!("Created segment **{}**.", name)).await?;
            cx.conversation
                .ui_action(
                    "fetch_and_select_list",
                    json!({ "listId": segment.id, "openEditPanel": true }),
                )
                .await?;
            Ok(Phase::ReviewSegment)
        }
        Err(PlatformError::Validation { message }) => {
            state.creation_attempts += 1;
            warn!(attempts = %state.creation_attempts, error = %message, "Segment rejected by platform");
            cx.conversation
                .error(format!(
                    "The platform rejected the segment (attempt {} of {}):\n{}\n\n```json\n{}\n```",
                    state.creation_attempts,
                    max,
                    message,
                    state.filter_query.to_pretty_json()
                ))
                .await?;
            state.last_creation_error = message;
            state.last_rejected_query = Some(state.filter_query.clone());

            Ok(if state.creation_attempts >= max {
                Phase::ManualFallback
            } else {
                Phase::RetryCreate
            })
        }
        Err(other) => Err(other.into()),
    }
}

/// Retry phase: ask for a complete audience description to regenerate from
pub(crate) async fn retry_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!(attempts = %state.creation_attempts, "retry_step: called");
    let mut prompt = format!(
        "Let's try again (attempt {} of {}). Please describe the COMPLETE audience you want to reach, \
         including every condition, not just the part that changed.\n\nLast error: {}",
        state.creation_attempts + 1,
        cx.services.config.max_creation_attempts,
        state.last_creation_error
    );
    loop {
        let answer = cx.conversation.ask("retry_audience", prompt).await?;
        let answer = answer.trim();
        if !answer.is_empty() {
            state.audience = answer.to_string();
            break;
        }
        // The previous audience was already rejected
        debug!("retry_step: blank description, asking again");
        prompt = "I need the full audience description to try again. Who should receive this campaign?".to_string();
    }
    Ok(Phase::GenerateQuery)
}

/// Manual fallback phase: adopt a segment the human created themselves
pub(crate) async fn manual_fallback_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!(attempts = %state.creation_attempts, "manual_fallback_step: called");
    let mut intro = format!(
        "I couldn't create the segment automatically after {} attempts. Please create it yourself in the \
         segment editor, then tell me its name.",
        state.creation_attempts
    );
    if let Some(query) = &state.last_rejected_query {
        intro.push_str(&format!(
            "\n\nThis is the filter I was trying to create:\n```json\n{}\n```",
            query.to_pretty_json()
        ));
    }
    cx.conversation.say(intro).await?;

    loop {
        let name = cx
            .conversation
            .ask("manual_segment", "What is the name of the segment you created?")
            .await?;
        let name = name.trim();
        if name.is_empty() {
            cx.conversation
                .say("No segment name given, so I've cancelled this campaign.")
                .await?;
            return Ok(Phase::Cancelled);
        }

        let segments = cx.services.segments.fetch_segments(cx.tenant).await?;
        let found = search(&segments, name);
        debug!(%name, matches = %found.len(), "manual_fallback_step: searched segments");

        let chosen = match found.as_slice() {
            [] => {
                cx.conversation
                    .error(format!(
                        "I couldn't find a segment matching \"{}\". Please check the name and try again.",
                        name
                    ))
                    .await?;
                continue;
            }
            [only] => (*only).clone(),
            many => pick(cx, name, many).await?,
        };

        info!(segment_id = %chosen.id, "Manually created segment adopted");
        state.adopt_segment(&chosen.id, &chosen.display_name);
        state.creation_attempts = 0;
        cx.conversation
            .say(format!("Found it. I'll use **{}**.", chosen.display_name))
            .await?;
        return Ok(Phase::CreateArtifact);
    }
}

/// Segments whose name or display name contains `needle`, case-insensitively
fn search<'a>(segments: &'a [Segment], needle: &str) -> Vec<&'a Segment> {
    let needle = needle.to_lowercase();
    segments
        .iter()
        .filter(|s| s.display_name.to_lowercase().contains(&needle) || s.name.to_lowercase().contains(&needle))
        .collect()
}

/// Present several candidates and wait until one of them is picked
async fn pick(cx: &StepContext<'_>, name: &str, candidates: &[&Segment]) -> WorkflowResult<Segment> {
    let options: Vec<ChoiceOption> = candidates
        .iter()
        .map(|s| ChoiceOption::new(s.id.clone(), s.display_name.clone(), s.name.clone()))
        .collect();
    loop {
        let choice = cx
            .conversation
            .choose(
                "manual_segment_choice",
                format!("Several segments match \"{}\". Which one did you create?", name),
                options.clone(),
            )
            .await?;
        let choice = choice.trim();
        if let Some(segment) = candidates.iter().find(|s| s.id == choice) {
            return Ok((*segment).clone());
        }
        cx.conversation
            .error("Please pick one of the listed segments.")
            .await?;
    }
}
