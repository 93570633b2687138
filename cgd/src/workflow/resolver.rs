//! Segment resolution
//!
//! Finds existing segments that already describe the requested audience, lets
//! the human pick one, or falls through to creating a new segment.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Services, StepContext, normalize_reply};
use crate::domain::{ConversationState, MatchedSegment, Phase, TenantContext};
use crate::error::WorkflowResult;
use crate::llm::complete_json;
use crate::platform::Segment;
use crate::session::ChoiceOption;

/// Outcome of looking for an existing segment
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Ranked candidates, best first
    Matches(Vec<MatchedSegment>),
    /// Nothing to compare against: no tenant, failed fetch, or no segments
    NoSegments,
    /// Segments exist but none scored high enough
    NoMatches,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    #[serde(default)]
    matches: Vec<ScoredSegment>,
}

#[derive(Debug, Deserialize)]
struct ScoredSegment {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "relevance_score")]
    score: f64,
    #[serde(default)]
    reason: String,
}

/// Score the tenant's segments against `audience`
pub async fn resolve_segments(services: &Services, tenant: &TenantContext, audience: &str) -> Resolution {
    debug!(%audience, "resolve_segments: called");
    if tenant.tenant_id().is_none() {
        warn!("resolve_segments: no tenant id, skipping lookup");
        return Resolution::NoSegments;
    }

    let segments = match services.segments.fetch_segments(tenant).await {
        Ok(segments) if !segments.is_empty() => segments,
        Ok(_) => {
            debug!("resolve_segments: tenant has no segments");
            return Resolution::NoSegments;
        }
        Err(e) => {
            warn!(error = %e, "resolve_segments: segment fetch failed");
            return Resolution::NoSegments;
        }
    };

    let window: Vec<&Segment> = segments.iter().take(services.config.scoring_window).collect();
    let scored = match score(services, audience, &window).await {
        Ok(scored) => scored,
        Err(e) => {
            warn!(error = %e, "resolve_segments: scoring failed, treating as no matches");
            return Resolution::NoMatches;
        }
    };

    let matches = rank(scored, &window, services.config.match_threshold, services.config.max_matches);
    info!(candidates = %window.len(), matches = %matches.len(), "Segments scored");
    if matches.is_empty() {
        Resolution::NoMatches
    } else {
        Resolution::Matches(matches)
    }
}

async fn score(services: &Services, audience: &str, window: &[&Segment]) -> WorkflowResult<Vec<ScoredSegment>> {
    let listing: Vec<Value> = window
        .iter()
        .enumerate()
        .map(|(index, s)| {
            json!({
                "index": index,
                "id": s.id,
                "display_name": s.display_name,
                "filters": s.filter_query.to_string(),
            })
        })
        .collect();
    let system = services.render("score-segments", &json!({ "audience": audience, "segments": listing }))?;
    let response: ScoreResponse = complete_json(
        &services.llm,
        services.request(system, "Score the segments against the intended audience."),
    )
    .await?;
    Ok(response.matches)
}

/// Keep scores above the threshold, best first, one entry per segment
fn rank(scored: Vec<ScoredSegment>, window: &[&Segment], threshold: f64, max: usize) -> Vec<MatchedSegment> {
    let mut matches: Vec<MatchedSegment> = Vec::new();
    for entry in scored {
        if entry.score.is_nan() || entry.score <= threshold {
            continue;
        }
        let segment = entry
            .index
            .and_then(|i| window.get(i).copied())
            .or_else(|| {
                let id = entry.id.as_ref().map(id_text)?;
                window.iter().copied().find(|s| s.id == id)
            });
        let Some(segment) = segment else {
            debug!(index = ?entry.index, id = ?entry.id, "rank: score refers to unknown segment");
            continue;
        };
        if matches.iter().any(|m| m.id == segment.id) {
            continue;
        }
        matches.push(MatchedSegment {
            id: segment.id.clone(),
            name: segment.name.clone(),
            display_name: segment.display_name.clone(),
            filter_query: segment.filter_query.clone(),
            relevance_score: entry.score.min(1.0),
            reason: entry.reason,
        });
    }
    matches.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    matches.truncate(max);
    matches
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve phase: everyone, an existing segment, or a new one
pub(crate) async fn resolve_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!(audience = %state.audience, "resolve_step: called");
    if state.targets_all_customers() {
        state.clear_segment();
        state.matched_segments.clear();
        cx.conversation
            .say("This campaign will go to **all customers**, so no segment is needed.")
            .await?;
        return Ok(Phase::CreateArtifact);
    }

    cx.conversation.thinking("Looking for existing segments that match...").await?;
    match resolve_segments(cx.services, cx.tenant, &state.audience).await {
        Resolution::Matches(matches) => {
            state.matched_segments = matches;
            Ok(Phase::SelectSegment)
        }
        Resolution::NoSegments => {
            state.matched_segments.clear();
            cx.conversation
                .say("I didn't find any existing segments for this location.")
                .await?;
            Ok(Phase::ConfirmCreate)
        }
        Resolution::NoMatches => {
            state.matched_segments.clear();
            cx.conversation
                .say("None of your existing segments match this audience closely enough.")
                .await?;
            Ok(Phase::ConfirmCreate)
        }
    }
}

/// Select phase: offer the matches plus "create new"
pub(crate) async fn select_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!(matches = %state.matched_segments.len(), "select_step: called");
    let mut options = vec![ChoiceOption::new(
        "0",
        "Create a new segment",
        format!("Build a new segment for: {}", state.audience),
    )];
    options.extend(state.matched_segments.iter().enumerate().map(|(idx, m)| {
        ChoiceOption::new(
            (idx + 1).to_string(),
            m.display_name.clone(),
            format!("{:.0}% match - {}", m.relevance_score * 100.0, m.reason),
        )
    }));

    let choice = cx
        .conversation
        .choose(
            "segment_choice",
            "I found existing segments that may fit this audience. Which one should I use?",
            options,
        )
        .await?;
    let choice = choice.trim();

    if choice == "0" {
        return Ok(Phase::GenerateQuery);
    }
    let picked = choice
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| state.matched_segments.get(i))
        .or_else(|| state.matched_segments.iter().find(|m| m.id == choice))
        .cloned();

    match picked {
        Some(segment) => {
            info!(segment_id = %segment.id, "Existing segment selected");
            state.adopt_segment(&segment.id, &segment.display_name);
            cx.conversation
                .say(format!("Great, I'll use **{}**.", segment.display_name))
                .await?;
            Ok(Phase::CreateArtifact)
        }
        None => {
            cx.conversation
                .error(format!("'{}' isn't one of the options, so I'll create a new segment.", choice))
                .await?;
            Ok(Phase::GenerateQuery)
        }
    }
}

/// Replies accepted as "go ahead and create it"
const CREATE_CONFIRMATIONS: [&str; 5] = ["yes", "y", "ok", "sure", "proceed"];

/// Confirm phase: create a new segment or stop
pub(crate) async fn confirm_create_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("confirm_create_step: called");
    let answer = cx
        .conversation
        .ask(
            "confirm_create",
            format!(
                "Shall I create a new segment for **{}**? (yes/no)",
                state.audience
            ),
        )
        .await?;

    if CREATE_CONFIRMATIONS.contains(&normalize_reply(&answer).as_str()) {
        Ok(Phase::GenerateQuery)
    } else {
        cx.conversation
            .say("Okay, I won't create a segment. The campaign has been cancelled.")
            .await?;
        Ok(Phase::Cancelled)
    }
}
