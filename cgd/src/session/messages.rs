//! Chat message types exchanged with the client
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON
//! followed by `\n`, tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Credentials, Location};

/// Messages from the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Tenant context and credentials, sent once after connecting
    Handshake {
        #[serde(default)]
        location: Location,
        #[serde(default)]
        credentials: Credentials,
    },

    /// A new campaign request
    UserMessage {
        #[serde(alias = "message")]
        text: String,
    },

    /// Answer to an outstanding question
    UserResponse {
        #[serde(rename = "questionId", alias = "question_id")]
        question_id: String,
        #[serde(alias = "response")]
        text: String,
    },

    /// Abandon the current conversation
    Reset,
}

/// One choice in an options message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
    pub description: String,
}

impl ChoiceOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: description.into(),
        }
    }
}

/// Messages to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Assistant {
        message: String,
    },

    System {
        message: String,
    },

    Error {
        message: String,
    },

    /// Echo of what the human typed
    User {
        message: String,
    },

    /// Free-text question awaiting a `user_response`
    Question {
        #[serde(rename = "questionId")]
        question_id: String,
        message: String,
    },

    /// Multiple-choice question awaiting a `user_response` carrying an option id
    Options {
        #[serde(rename = "questionId")]
        question_id: String,
        message: String,
        options: Vec<ChoiceOption>,
    },

    /// Progress indicator while the model works
    AssistantThinking {
        message: String,
        #[serde(rename = "disableInput")]
        disable_input: bool,
    },

    /// Navigation/refresh hint for the client UI
    UiAction {
        action: String,
        payload: Value,
    },
}

impl Outbound {
    /// Question id if this message expects an answer
    pub fn question_id(&self) -> Option<&str> {
        match self {
            Outbound::Question { question_id, .. } | Outbound::Options { question_id, .. } => Some(question_id),
            _ => None,
        }
    }

    /// Main text of the message, if it has one
    pub fn text(&self) -> Option<&str> {
        match self {
            Outbound::Assistant { message }
            | Outbound::System { message }
            | Outbound::Error { message }
            | Outbound::User { message }
            | Outbound::Question { message, .. }
            | Outbound::Options { message, .. }
            | Outbound::AssistantThinking { message, .. } => Some(message),
            Outbound::UiAction { .. } => None,
        }
    }
}
