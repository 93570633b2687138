//! LLM client module
//!
//! Provides completion requests, the provider client, and JSON helpers used by
//! every workflow step.

use std::sync::Arc;

use tracing::debug;

pub mod client;
mod error;
pub mod json;
mod openai;
mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use json::{complete_json, complete_text, parse_json_value, strip_code_fences};
pub use openai::OpenAIClient;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, TokenUsage};

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
///
/// Supports "groq" and "openai"; both use the chat-completions protocol.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "groq" | "openai" => {
            debug!("create_client: creating chat-completions client");
            Ok(Arc::new(OpenAIClient::from_config(config)?))
        }
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(LlmError::Config(format!(
                "Unknown LLM provider: '{}'. Supported: groq, openai",
                other
            )))
        }
    }
}
