//! Campaign-building workflow
//!
//! Each phase of a conversation is one step function; the orchestrator routes
//! between them on the phase each step returns. Steps talk to the human through
//! a `Conversation` and to the outside world through the `Services` bundle.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::config::WorkflowConfig;
use crate::domain::TenantContext;
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::{CompletionRequest, LlmClient};
use crate::platform::{CampaignStore, SegmentStore};
use crate::prompts::PromptLoader;
use crate::session::Conversation;

mod artifact;
mod clarify;
mod creation;
mod extract;
mod orchestrator;
mod query;
mod resolver;
mod review;
mod schedule;
#[cfg(test)]
pub(crate) mod testing;

pub use extract::{extract_brief, refine_brief};
pub use orchestrator::Orchestrator;
pub use query::{generate_query, load_whitelists};
pub use resolver::{Resolution, resolve_segments};
pub use review::{Reviewable, is_affirmative, run_review};

/// Collaborators and limits shared by every conversation
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<PromptLoader>,
    pub segments: Arc<dyn SegmentStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub config: WorkflowConfig,
    /// Token cap for each model call
    pub max_tokens: u32,
}

impl Services {
    /// Render a prompt template; a broken template is an internal error
    pub fn render<T: Serialize>(&self, template: &str, context: &T) -> WorkflowResult<String> {
        debug!(%template, "Services::render: called");
        self.prompts
            .render(template, context)
            .map_err(|e| WorkflowError::InternalConsistency(e.to_string()))
    }

    /// One-shot request: rendered system prompt plus a user message
    pub fn request(&self, system_prompt: String, user: impl Into<String>) -> CompletionRequest {
        CompletionRequest::single(system_prompt, user, self.max_tokens)
    }
}

/// What a step can reach while it runs
pub struct StepContext<'a> {
    pub services: &'a Services,
    pub tenant: &'a TenantContext,
    pub conversation: &'a Conversation,
}

/// Today's date as shown to the model
pub(crate) fn today() -> String {
    Utc::now().format("%A, %B %-d, %Y").to_string()
}

/// Lowercased reply with surrounding whitespace and trailing punctuation removed
pub(crate) fn normalize_reply(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?', ','])
        .trim()
        .to_lowercase()
}
