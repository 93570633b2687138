//! Filter query generation and the segment review
//!
//! The model translates the audience into a filter query constrained by the
//! tenant's attribute and event-type whitelists. Validation here is advisory:
//! unknown names are logged and left for the platform to judge.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::review::{Reviewable, run_review};
use super::{Services, StepContext, today};
use crate::domain::catalog::{BASE_CONTACT_PROPERTIES, INTERACTION_TYPES};
use crate::domain::{ConversationState, FilterQuery, Phase, TenantContext, Whitelists};
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::complete_json;

/// Tenant whitelists with built-in fallbacks for failed or empty fetches
pub async fn load_whitelists(services: &Services, tenant: &TenantContext) -> Whitelists {
    debug!("load_whitelists: called");
    let attributes = match services.segments.fetch_attribute_whitelist(tenant).await {
        Ok(names) if !names.is_empty() => names,
        Ok(_) => {
            warn!("load_whitelists: attribute whitelist empty, using base properties");
            owned(BASE_CONTACT_PROPERTIES)
        }
        Err(e) => {
            warn!(error = %e, "load_whitelists: attribute fetch failed, using base properties");
            owned(BASE_CONTACT_PROPERTIES)
        }
    };
    let event_types = match services.segments.fetch_event_type_whitelist(tenant).await {
        Ok(names) if !names.is_empty() => names,
        Ok(_) | Err(_) => {
            debug!("load_whitelists: using built-in interaction types");
            owned(INTERACTION_TYPES)
        }
    };
    Whitelists { attributes, event_types }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Parse a model payload as a filter query, logging names outside the whitelists
///
/// Only a payload that was empty to begin with yields an empty query. When
/// every predicate the model wrote had to be discarded, the payload is treated
/// as unreadable so the phase runs again instead of targeting everyone.
fn parse_query(value: &Value, whitelists: &Whitelists) -> WorkflowResult<FilterQuery> {
    let parsed = FilterQuery::from_value_lenient(value).map_err(|e| WorkflowError::Extraction(e.to_string()))?;
    if parsed.query.is_empty() && !parsed.dropped.is_empty() {
        return Err(WorkflowError::Extraction(format!(
            "no usable filters in the generated query ({})",
            parsed.dropped.join("; ")
        )));
    }
    let unknown = parsed.query.unknown_names(whitelists);
    if !unknown.is_empty() {
        warn!(%unknown, "parse_query: query uses names outside the whitelists");
    }
    Ok(parsed.query)
}

/// Generate a filter query for the audience in `state`
pub async fn generate_query(
    services: &Services,
    tenant: &TenantContext,
    state: &ConversationState,
    whitelists: &Whitelists,
) -> WorkflowResult<FilterQuery> {
    debug!(audience = %state.audience, attempts = %state.creation_attempts, "generate_query: called");
    let previous_query = state.last_rejected_query.as_ref().map(FilterQuery::to_pretty_json);
    let system = services.render(
        "filter-query",
        &json!({
            "tenant": tenant.describe(),
            "today": today(),
            "attributes": whitelists.attributes,
            "event_types": whitelists.event_types,
            "previous_error": state.last_creation_error,
            "previous_query": previous_query,
        }),
    )?;
    let user = format!("Audience: {}", state.audience);
    let value: Value = complete_json(&services.llm, services.request(system, user)).await?;
    parse_query(&value, whitelists)
}

/// Generate phase: build the query, or skip filtering when none is needed
pub(crate) async fn generate_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("generate_step: called");
    cx.conversation.thinking("Building the audience filter...").await?;
    let whitelists = load_whitelists(cx.services, cx.tenant).await;
    let query = generate_query(cx.services, cx.tenant, state, &whitelists).await?;

    if query.is_empty() {
        if state.creation_attempts == 0 {
            info!("Empty filter query, targeting all customers");
            state.clear_segment();
            cx.conversation
                .say("No audience filtering is needed, so the campaign will go to **all customers**.")
                .await?;
            return Ok(Phase::CreateArtifact);
        }

        state.creation_attempts += 1;
        state.last_creation_error = "The regenerated filter was empty".to_string();
        warn!(attempts = %state.creation_attempts, "generate_step: empty query during retry");
        cx.conversation
            .error(format!(
                "I couldn't build a filter from that description (attempt {} of {}).",
                state.creation_attempts, cx.services.config.max_creation_attempts
            ))
            .await?;
        return Ok(if state.creation_attempts >= cx.services.config.max_creation_attempts {
            Phase::ManualFallback
        } else {
            Phase::RetryCreate
        });
    }

    state.filter_query = query;
    cx.conversation
        .say(format!("**Audience filter:**\n{}", state.filter_query.describe()))
        .await?;
    Ok(Phase::CreateSegment)
}

/// What the model returns for a segment change request
#[derive(Debug, Default, Deserialize)]
struct RevisionEnvelope {
    #[serde(default)]
    filter_query: Option<Value>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// A parsed segment revision
#[derive(Debug, Clone, PartialEq)]
struct SegmentRevision {
    query: FilterQuery,
    display_name: Option<String>,
    explanation: Option<String>,
}

impl SegmentRevision {
    /// Read the model's reply; a refusal becomes a validation error carrying its reason
    fn from_value(value: &Value) -> WorkflowResult<Self> {
        let envelope = match value {
            Value::Object(_) => serde_json::from_value::<RevisionEnvelope>(value.clone())
                .map_err(|e| WorkflowError::Extraction(format!("unreadable segment revision: {}", e)))?,
            _ => RevisionEnvelope {
                filter_query: Some(value.clone()),
                ..RevisionEnvelope::default()
            },
        };

        let refused = envelope.error.as_ref().is_some_and(|e| match e {
            Value::Bool(flag) => *flag,
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        });
        if refused {
            let reason = envelope
                .reason
                .or_else(|| envelope.error.as_ref().and_then(Value::as_str).map(str::to_string))
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "the change could not be applied to this segment".to_string());
            return Err(WorkflowError::Validation(reason));
        }

        // Other envelope keys are handled by the lenient parser
        let raw = envelope.filter_query.unwrap_or_else(|| value.clone());
        let parsed = FilterQuery::from_value_lenient(&raw).map_err(|e| WorkflowError::Extraction(e.to_string()))?;
        Ok(Self {
            query: parsed.query,
            display_name: non_blank(envelope.display_name),
            explanation: non_blank(envelope.explanation),
        })
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Review of a newly created segment's filters
pub(crate) struct SegmentReview;

#[async_trait]
impl Reviewable for SegmentReview {
    fn label(&self) -> &'static str {
        "segment"
    }

    fn render(&self, state: &ConversationState) -> String {
        format!(
            "**Segment:** {}\n\n{}\n\nReply **looks good** to continue, or tell me what to change.",
            state.segment_display_name,
            state.filter_query.describe()
        )
    }

    async fn revise(&self, cx: &StepContext<'_>, state: &mut ConversationState, request: &str) -> WorkflowResult<()> {
        debug!(segment_id = %state.segment_id, "SegmentReview::revise: called");
        let services = cx.services;
        let whitelists = load_whitelists(services, cx.tenant).await;
        let system = services.render(
            "revise-filter",
            &json!({
                "display_name": state.segment_display_name,
                "audience": state.audience,
                "current_query": state.filter_query.to_pretty_json(),
                "attributes": whitelists.attributes,
                "event_types": whitelists.event_types,
            }),
        )?;
        let value: Value = complete_json(&services.llm, services.request(system, request)).await?;
        let revision = SegmentRevision::from_value(&value)?;
        let query = revision.query;

        if query.is_empty() {
            return Err(WorkflowError::Validation(
                "the updated segment would have no valid filters left".to_string(),
            ));
        }
        let unknown = query.unknown_names(&whitelists);
        if !unknown.is_empty() {
            return Err(WorkflowError::Validation(unknown.to_string()));
        }

        let display_name = revision
            .display_name
            .unwrap_or_else(|| state.segment_display_name.clone());
        services
            .segments
            .update_segment(cx.tenant, &state.segment_id, &display_name, &query)
            .await?;
        if display_name != state.segment_display_name {
            info!(segment_id = %state.segment_id, %display_name, "Segment renamed");
            state.segment_display_name = display_name;
        }
        state.filter_query = query;
        state.segment_revisions += 1;
        if let Some(explanation) = revision.explanation {
            cx.conversation.say(explanation).await?;
        }

        cx.conversation.ui_action("close_action_panel", json!({})).await?;
        cx.conversation
            .ui_action(
                "fetch_and_select_list",
                json!({ "listId": state.segment_id, "openEditPanel": true }),
            )
            .await?;
        Ok(())
    }
}

/// Segment review phase
pub(crate) async fn review_segment_step(cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
    debug!("review_segment_step: called");
    run_review(cx, state, &SegmentReview).await?;
    Ok(Phase::CreateArtifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::workflow::testing::{StubPlatform, scripted_human, services, tenant, texts, ui_actions};

    const NY_QUERY: &str = r#"{"filter_query":[[{"filter_type":"contact_property","property_name":"city","operator":"equals","value":"New York"}]]}"#;

    #[tokio::test]
    async fn test_whitelist_fallbacks() {
        let platform = StubPlatform::new();
        let services = services(MockLlmClient::from_texts(Vec::<String>::new()), platform.clone());

        let wl = load_whitelists(&services, &tenant()).await;
        assert_eq!(wl.attributes.len(), BASE_CONTACT_PROPERTIES.len());
        assert_eq!(wl.event_types.len(), INTERACTION_TYPES.len());

        *platform.attributes.lock().unwrap() = Some(vec!["city".to_string(), "vip_tier".to_string()]);
        let wl = load_whitelists(&services, &tenant()).await;
        assert_eq!(wl.attributes, vec!["city", "vip_tier"]);
    }

    #[tokio::test]
    async fn test_generate_unwraps_envelope_and_fences() {
        let llm = MockLlmClient::from_texts([format!("```json\n{}\n```", NY_QUERY)]);
        let services = services(llm, StubPlatform::new());
        let tenant = tenant();
        let wl = load_whitelists(&services, &tenant).await;
        let mut state = ConversationState::new("x");
        state.audience = "contacts in New York".to_string();

        let query = generate_query(&services, &tenant, &state, &wl).await.unwrap();
        assert_eq!(query.groups().len(), 1);
        assert!(query.attribute_names().contains("city"));
    }

    #[tokio::test]
    async fn test_unknown_names_are_not_rejected() {
        let llm = MockLlmClient::from_texts([
            r#"[[{"filter_type":"contact_property","property_name":"shoe_size","operator":"equals","value":"9"}]]"#,
        ]);
        let services = services(llm, StubPlatform::new());
        let tenant = tenant();
        let wl = load_whitelists(&services, &tenant).await;

        let query = generate_query(&services, &tenant, &ConversationState::new("x"), &wl).await.unwrap();
        assert!(!query.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_query_is_extraction_error() {
        let llm = MockLlmClient::from_texts([r#"{"filter_query": "city = New York"}"#]);
        let services = services(llm, StubPlatform::new());
        let tenant = tenant();
        let wl = load_whitelists(&services, &tenant).await;

        let err = generate_query(&services, &tenant, &ConversationState::new("x"), &wl).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_empty_query_first_time_targets_everyone() {
        let services = services(MockLlmClient::from_texts(["[]"]), StubPlatform::new());
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&[]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");

        assert_eq!(generate_step(&cx, &mut state).await.unwrap(), Phase::CreateArtifact);
        assert!(state.segment_id.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_during_retry_counts_as_attempt() {
        let services = services(MockLlmClient::from_texts(["[]", "[]"]), StubPlatform::new());
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&[]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");
        state.creation_attempts = 1;

        assert_eq!(generate_step(&cx, &mut state).await.unwrap(), Phase::RetryCreate);
        assert_eq!(state.creation_attempts, 2);
        assert_eq!(generate_step(&cx, &mut state).await.unwrap(), Phase::ManualFallback);
    }

    #[tokio::test]
    async fn test_segment_review_applies_and_rejects() {
        let llm = MockLlmClient::from_texts([
            r#"[[{"filter_type":"interaction","operator":"has_interaction","interaction_type":"teleported"}]]"#,
            "[[]]",
            NY_QUERY,
        ]);
        let platform = StubPlatform::new();
        let services = services(llm, platform.clone());
        let tenant = tenant();
        let (conversation, human) = scripted_human(&["only teleporters", "remove everything", "new york only", "yes"]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");
        state.record_created_segment("seg-1", "AI - Vips");

        assert_eq!(review_segment_step(&cx, &mut state).await.unwrap(), Phase::CreateArtifact);
        assert_eq!(state.segment_revisions, 1);
        assert_eq!(platform.updated.lock().unwrap().len(), 1);
        assert!(state.filter_query.attribute_names().contains("city"));

        drop(conversation);
        let actions: Vec<_> = ui_actions(&human.await.unwrap()).into_iter().map(|(a, _)| a).collect();
        assert_eq!(actions, vec!["close_action_panel", "fetch_and_select_list"]);
    }

    #[tokio::test]
    async fn test_fully_discarded_query_does_not_target_everyone() {
        let llm = MockLlmClient::from_texts([
            r#"{"filter_query":[[{"filter_type":"contact_property","property_name":"city","operator":"eq","value":"New York"}]]}"#,
        ]);
        let platform = StubPlatform::new();
        let services = services(llm, platform.clone());
        let tenant = tenant();
        let (conversation, _human) = scripted_human(&[]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");
        state.audience = "contacts in New York".to_string();
        state.segment_name = "new york contacts".to_string();

        let err = generate_step(&cx, &mut state).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Extraction(ref m) if m.contains("eq")));
        assert_eq!(state.segment_name, "new york contacts");
        assert!(state.filter_query.is_empty());
        assert!(platform.created.lock().unwrap().is_empty());
    }

    #[test]
    fn test_revision_envelope_fields() {
        let revision = SegmentRevision::from_value(&json!({
            "filter_query": [[{"filter_type": "contact_property", "property_name": "city", "operator": "equals", "value": "Boston"}]],
            "display_name": "AI - Boston Contacts",
            "explanation": "Switched the city to Boston.",
        }))
        .unwrap();
        assert!(revision.query.attribute_names().contains("city"));
        assert_eq!(revision.display_name.as_deref(), Some("AI - Boston Contacts"));
        assert_eq!(revision.explanation.as_deref(), Some("Switched the city to Boston."));

        let bare = SegmentRevision::from_value(&json!([[{"filter_type": "contact_list", "operator": "in_list", "list_name": "VIP"}]]))
            .unwrap();
        assert_eq!(bare.display_name, None);
        assert_eq!(bare.explanation, None);

        let blank = SegmentRevision::from_value(&json!({"filters": [], "display_name": "  "})).unwrap();
        assert!(blank.query.is_empty());
        assert_eq!(blank.display_name, None);
    }

    #[test]
    fn test_revision_refusal_keeps_reason() {
        let err = SegmentRevision::from_value(&json!({
            "error": true,
            "reason": "There is no loyalty tier property for this location.",
        }))
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(ref m) if m == "There is no loyalty tier property for this location."));

        let err = SegmentRevision::from_value(&json!({"error": "unsupported request"})).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(ref m) if m == "unsupported request"));

        let ok = SegmentRevision::from_value(&json!({"error": null, "filter_query": []})).unwrap();
        assert!(ok.query.is_empty());
    }

    #[tokio::test]
    async fn test_segment_review_renames_and_explains() {
        let llm = MockLlmClient::from_texts([
            r#"{"error": true, "reason": "There is no shoe size property."}"#,
            r#"{"filter_query":[[{"filter_type":"contact_property","property_name":"city","operator":"equals","value":"Boston"}]],"display_name":"AI - Boston Contacts","explanation":"Switched the city to Boston and renamed the segment."}"#,
        ]);
        let platform = StubPlatform::new();
        let services = services(llm, platform.clone());
        let tenant = tenant();
        let (conversation, human) = scripted_human(&["only size 9 shoes", "boston instead, and rename it", "yes"]);
        let cx = StepContext {
            services: &services,
            tenant: &tenant,
            conversation: &conversation,
        };
        let mut state = ConversationState::new("x");
        state.record_created_segment("seg-1", "AI - New York Contacts");

        assert_eq!(review_segment_step(&cx, &mut state).await.unwrap(), Phase::CreateArtifact);
        assert_eq!(state.segment_display_name, "AI - Boston Contacts");
        assert_eq!(state.segment_revisions, 1);
        let updated = platform.updated.lock().unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].0, "seg-1");
        assert_eq!(updated[0].1, "AI - Boston Contacts");
        drop(updated);

        drop(conversation);
        let transcript = human.await.unwrap();
        let errors = texts(&transcript, "error");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("There is no shoe size property."));
        assert!(
            texts(&transcript, "assistant")
                .iter()
                .any(|t| t == "Switched the city to Boston and renamed the segment.")
        );
    }
}
