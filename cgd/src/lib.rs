//! campaignd - conversational email campaign builder
//!
//! A human describes a campaign in free text; campaignd turns the request into a
//! structured brief, asks clarifying questions, picks or creates an audience
//! segment, drafts the email, and schedules the send, pausing for human review
//! at each stage.
//!
//! # Modules
//!
//! - [`workflow`] - Phase steps and the conversation orchestrator
//! - [`session`] - Chat messages, pending answers, and the session registry
//! - [`domain`] - Conversation state, phases, filter queries, tenants
//! - [`llm`] - Completion client and JSON extraction helpers
//! - [`platform`] - Contact/campaign platform API client
//! - [`prompts`] - Prompt templates with user overrides
//! - [`server`] - Unix socket transport
//! - [`repl`] - Terminal chat front end
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod platform;
pub mod prompts;
pub mod repl;
pub mod server;
pub mod session;
pub mod workflow;

pub use config::Config;
pub use domain::{ConversationState, Phase, TenantContext};
pub use error::{WorkflowError, WorkflowResult};
pub use llm::{LlmClient, LlmError};
pub use platform::{CampaignStore, PlatformClient, PlatformError, SegmentStore};
pub use session::{Inbound, Outbound, SessionRegistry};
pub use workflow::{Orchestrator, Services};
