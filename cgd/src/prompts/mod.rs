//! Prompt Template System
//!
//! Loads and renders `.pmt` (prompt template) files for every model call.
//!
//! Template loading chain:
//! 1. `~/.config/campaignd/prompts/{name}.pmt` (user override)
//! 2. Embedded fallback in code
//!
//! Templates use Handlebars syntax with HTML escaping disabled.

pub mod embedded;
mod loader;

pub use loader::PromptLoader;
