//! campaignd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main campaignd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Language model provider configuration
    pub llm: LlmConfig,

    /// Contact/campaign platform API configuration
    pub platform: PlatformConfig,

    /// Conversation workflow limits
    pub workflow: WorkflowConfig,

    /// Socket server configuration
    pub server: ServerConfig,

    /// Log level used when --log-level is not given
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that required environment variables are set. Call this early in
    /// startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        if self.workflow.max_creation_attempts == 0 {
            return Err(eyre::eyre!("workflow.max-creation-attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.workflow.match_threshold) {
            return Err(eyre::eyre!(
                "workflow.match-threshold must be between 0.0 and 1.0, got {}",
                self.workflow.match_threshold
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .campaignd.yml
        let local_config = PathBuf::from(".campaignd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/campaignd/campaignd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("campaignd").join("campaignd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Language model provider configuration
///
/// Both supported providers speak the OpenAI chat-completions protocol; the
/// provider name only selects defaults for the base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("groq" or "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL (without the /v1 suffix)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        debug!(api_key_env = %self.api_key_env, "LlmConfig::get_api_key: called");
        std::env::var(&self.api_key_env)
            .map_err(|_| eyre::eyre!("Environment variable {} is not set", self.api_key_env))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "openai/gpt-oss-120b".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            base_url: "https://api.groq.com/openai".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout_ms: 120_000,
        }
    }
}

/// Contact/campaign platform API configuration
///
/// Credentials supplied in a connection handshake take precedence over the
/// environment variables named here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// API base URL; "/v2" is appended when missing
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Environment variable containing the bearer token
    #[serde(rename = "bearer-token-env")]
    pub bearer_token_env: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Page size used when listing segments
    #[serde(rename = "page-size")]
    pub page_size: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key_env: "PLATFORM_API_KEY".to_string(),
            bearer_token_env: "PLATFORM_BEARER_TOKEN".to_string(),
            timeout_ms: 30_000,
            page_size: 100,
        }
    }
}

/// Conversation workflow limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Questions asked per clarification round; extras are dropped
    #[serde(rename = "max-questions-per-round")]
    pub max_questions_per_round: usize,

    /// Clarification rounds before proceeding on best judgment (unbounded when unset)
    #[serde(rename = "max-clarification-rounds", skip_serializing_if = "Option::is_none")]
    pub max_clarification_rounds: Option<u32>,

    /// Segment creation attempts before manual fallback
    #[serde(rename = "max-creation-attempts")]
    pub max_creation_attempts: u32,

    /// Minimum relevance score for an existing segment to be offered
    #[serde(rename = "match-threshold")]
    pub match_threshold: f64,

    /// Maximum number of existing segments offered
    #[serde(rename = "max-matches")]
    pub max_matches: usize,

    /// Number of existing segments sent to the model for scoring
    #[serde(rename = "scoring-window")]
    pub scoring_window: usize,

    /// Consecutive extraction failures in one phase before giving up
    #[serde(rename = "max-step-retries")]
    pub max_step_retries: u32,

    /// Review rounds before the current artifact is accepted (unbounded when unset)
    #[serde(rename = "max-review-rounds", skip_serializing_if = "Option::is_none")]
    pub max_review_rounds: Option<u32>,

    /// Seconds to wait for a human answer (waits forever when unset)
    #[serde(rename = "answer-timeout-secs", skip_serializing_if = "Option::is_none")]
    pub answer_timeout_secs: Option<u64>,
}

impl WorkflowConfig {
    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_questions_per_round: 5,
            max_clarification_rounds: None,
            max_creation_attempts: 3,
            match_threshold: 0.5,
            max_matches: 3,
            scoring_window: 50,
            max_step_retries: 3,
            max_review_rounds: None,
            answer_timeout_secs: None,
        }
    }
}

/// Socket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket path
    #[serde(rename = "socket-path")]
    pub socket_path: PathBuf,

    /// Maximum size of one inbound message line
    #[serde(rename = "max-message-bytes")]
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::server::default_socket_path(),
            max_message_bytes: 64 * 1024,
        }
    }
}
