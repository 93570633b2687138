//! Stub collaborators and a scripted human for step tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Services;
use crate::config::WorkflowConfig;
use crate::domain::{FilterQuery, TenantContext};
use crate::llm::LlmClient;
use crate::llm::client::mock::MockLlmClient;
use crate::platform::{CampaignStore, PlatformError, ScheduleRequest, Segment, SegmentStore};
use crate::prompts::PromptLoader;
use crate::session::{Conversation, Outbound, PendingAnswers};

/// In-memory platform recording every call
#[derive(Default)]
pub struct StubPlatform {
    pub segments: Mutex<Vec<Segment>>,
    pub fail_fetch: Mutex<bool>,
    pub create_results: Mutex<VecDeque<Result<Segment, PlatformError>>>,
    pub created: Mutex<Vec<(String, FilterQuery)>>,
    pub updated: Mutex<Vec<(String, String, FilterQuery)>>,
    pub attributes: Mutex<Option<Vec<String>>>,
    pub documents: Mutex<Vec<String>>,
    pub schedule_results: Mutex<VecDeque<Result<(), PlatformError>>>,
    pub scheduled: Mutex<Vec<ScheduleRequest>>,
}

impl StubPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_segments(segments: Vec<Segment>) -> Arc<Self> {
        let stub = Self::default();
        *stub.segments.lock().unwrap() = segments;
        Arc::new(stub)
    }

    pub fn push_create(&self, result: Result<Segment, PlatformError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn push_schedule(&self, result: Result<(), PlatformError>) {
        self.schedule_results.lock().unwrap().push_back(result);
    }
}

pub fn segment(id: &str, name: &str) -> Segment {
    Segment {
        id: id.to_string(),
        name: name.to_lowercase().replace(' ', "_"),
        display_name: name.to_string(),
        filter_query: serde_json::json!([]),
    }
}

pub fn rejected(message: &str) -> PlatformError {
    PlatformError::Validation {
        message: message.to_string(),
    }
}

#[async_trait]
impl SegmentStore for StubPlatform {
    async fn fetch_segments(&self, _tenant: &TenantContext) -> Result<Vec<Segment>, PlatformError> {
        if *self.fail_fetch.lock().unwrap() {
            return Err(PlatformError::Decode("stub fetch failure".to_string()));
        }
        Ok(self.segments.lock().unwrap().clone())
    }

    async fn create_segment(
        &self,
        _tenant: &TenantContext,
        display_name: &str,
        query: &FilterQuery,
    ) -> Result<Segment, PlatformError> {
        self.created.lock().unwrap().push((display_name.to_string(), query.clone()));
        let next = self.create_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            let id = format!("seg-{}", self.created.lock().unwrap().len());
            Ok(segment(&id, display_name))
        })
    }

    async fn update_segment(
        &self,
        _tenant: &TenantContext,
        segment_id: &str,
        display_name: &str,
        query: &FilterQuery,
    ) -> Result<Segment, PlatformError> {
        self.updated
            .lock()
            .unwrap()
            .push((segment_id.to_string(), display_name.to_string(), query.clone()));
        Ok(segment(segment_id, display_name))
    }

    async fn fetch_attribute_whitelist(&self, _tenant: &TenantContext) -> Result<Vec<String>, PlatformError> {
        self.attributes
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PlatformError::Decode("stub whitelist failure".to_string()))
    }

    async fn fetch_event_type_whitelist(&self, _tenant: &TenantContext) -> Result<Vec<String>, PlatformError> {
        Err(PlatformError::Decode("no event types endpoint".to_string()))
    }
}

#[async_trait]
impl CampaignStore for StubPlatform {
    async fn create_campaign(
        &self,
        _tenant: &TenantContext,
        _name: &str,
        _subject_line: &str,
    ) -> Result<String, PlatformError> {
        Ok("camp-1".to_string())
    }

    async fn create_email_document(
        &self,
        _tenant: &TenantContext,
        _campaign_id: &str,
        html: &str,
    ) -> Result<String, PlatformError> {
        self.documents.lock().unwrap().push(html.to_string());
        Ok("doc-1".to_string())
    }

    async fn update_email_document(
        &self,
        _tenant: &TenantContext,
        _document_id: &str,
        html: &str,
    ) -> Result<(), PlatformError> {
        self.documents.lock().unwrap().push(html.to_string());
        Ok(())
    }

    async fn schedule_campaign(&self, _tenant: &TenantContext, request: &ScheduleRequest) -> Result<(), PlatformError> {
        self.scheduled.lock().unwrap().push(request.clone());
        self.schedule_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub fn services(llm: MockLlmClient, platform: Arc<StubPlatform>) -> Services {
    services_with(Arc::new(llm), platform)
}

pub fn services_with(llm: Arc<dyn LlmClient>, platform: Arc<StubPlatform>) -> Services {
    Services {
        llm,
        prompts: Arc::new(PromptLoader::embedded_only()),
        segments: platform.clone(),
        campaigns: platform,
        config: WorkflowConfig::default(),
        max_tokens: 1024,
    }
}

pub fn tenant() -> TenantContext {
    let mut ctx = TenantContext::default();
    ctx.location.id = "42".to_string();
    ctx.location.name = "Joe's Cafe".to_string();
    ctx.location.timezone = "America/New_York".to_string();
    ctx
}

/// A human answering questions from a fixed script
///
/// When the script runs out, outstanding questions are cancelled so the step
/// under test ends instead of hanging.
pub fn scripted_human(answers: &[&str]) -> (Conversation, JoinHandle<Vec<Outbound>>) {
    let (tx, mut rx) = mpsc::channel(64);
    let pending = PendingAnswers::new();
    let conversation = Conversation::new("test", tx, pending.clone(), None);
    let mut answers: VecDeque<String> = answers.iter().map(|a| a.to_string()).collect();

    let handle = tokio::spawn(async move {
        let mut transcript = Vec::new();
        while let Some(message) = rx.recv().await {
            let question_id = message.question_id().map(str::to_string);
            transcript.push(message);
            if let Some(id) = question_id {
                match answers.pop_front() {
                    Some(answer) => {
                        pending.resolve(&id, answer).await;
                    }
                    None => {
                        pending.cancel_all().await;
                    }
                }
            }
        }
        transcript
    });
    (conversation, handle)
}

/// Text of every message of one kind
pub fn texts(transcript: &[Outbound], kind: &str) -> Vec<String> {
    transcript
        .iter()
        .filter(|m| {
            serde_json::to_value(m)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == kind))
                .unwrap_or(false)
        })
        .filter_map(|m| m.text().map(str::to_string))
        .collect()
}

/// Actions of every ui_action message, in order
pub fn ui_actions(transcript: &[Outbound]) -> Vec<(String, serde_json::Value)> {
    transcript
        .iter()
        .filter_map(|m| match m {
            Outbound::UiAction { action, payload } => Some((action.clone(), payload.clone())),
            _ => None,
        })
        .collect()
}
