//! Outbound side of a conversation
//!
//! `Conversation` is the handle workflow steps use to talk to the human: plain
//! messages, progress indicators, UI hints, and questions that suspend the step
//! until the matching `user_response` arrives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::{ChoiceOption, Outbound};
use super::pending::PendingAnswers;
use crate::error::{WorkflowError, WorkflowResult};

/// Per-conversation messaging handle
#[derive(Clone)]
pub struct Conversation {
    id: String,
    outbox: mpsc::Sender<Outbound>,
    pending: PendingAnswers,
    next_question: Arc<AtomicU64>,
    answer_timeout: Option<Duration>,
}

impl Conversation {
    pub fn new(
        id: impl Into<String>,
        outbox: mpsc::Sender<Outbound>,
        pending: PendingAnswers,
        answer_timeout: Option<Duration>,
    ) -> Self {
        let id = id.into();
        debug!(%id, ?answer_timeout, "Conversation::new: called");
        Self {
            id,
            outbox,
            pending,
            next_question: Arc::new(AtomicU64::new(1)),
            answer_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pending-answer table backing this conversation's questions
    pub fn pending(&self) -> &PendingAnswers {
        &self.pending
    }

    /// Push one message to the client; a closed outbox means the client left
    pub async fn send(&self, message: Outbound) -> WorkflowResult<()> {
        debug!(conversation = %self.id, "Conversation::send: called");
        self.outbox.send(message).await.map_err(|_| {
            debug!(conversation = %self.id, "Conversation::send: outbox closed");
            WorkflowError::Cancelled
        })
    }

    pub async fn say(&self, message: impl Into<String>) -> WorkflowResult<()> {
        self.send(Outbound::Assistant {
            message: message.into(),
        })
        .await
    }

    pub async fn system(&self, message: impl Into<String>) -> WorkflowResult<()> {
        self.send(Outbound::System {
            message: message.into(),
        })
        .await
    }

    pub async fn error(&self, message: impl Into<String>) -> WorkflowResult<()> {
        self.send(Outbound::Error {
            message: message.into(),
        })
        .await
    }

    /// Progress indicator; input stays disabled until the next question
    pub async fn thinking(&self, message: impl Into<String>) -> WorkflowResult<()> {
        self.send(Outbound::AssistantThinking {
            message: message.into(),
            disable_input: true,
        })
        .await
    }

    pub async fn ui_action(&self, action: &str, payload: Value) -> WorkflowResult<()> {
        debug!(conversation = %self.id, %action, "Conversation::ui_action: called");
        self.send(Outbound::UiAction {
            action: action.to_string(),
            payload,
        })
        .await
    }

    /// Allocate a question id unique within this conversation
    pub fn next_question_id(&self, kind: &str) -> String {
        let n = self.next_question.fetch_add(1, Ordering::SeqCst);
        format!("{}_{}", kind, n)
    }

    /// Ask a free-text question and wait for the answer
    pub async fn ask(&self, kind: &str, message: impl Into<String>) -> WorkflowResult<String> {
        let question_id = self.next_question_id(kind);
        debug!(conversation = %self.id, %question_id, "Conversation::ask: called");
        let rx = self.pending.register(&question_id).await?;
        self.send(Outbound::Question {
            question_id: question_id.clone(),
            message: message.into(),
        })
        .await?;
        self.await_answer(&question_id, rx).await
    }

    /// Offer a set of choices and wait for the chosen option id
    pub async fn choose(
        &self,
        kind: &str,
        message: impl Into<String>,
        options: Vec<ChoiceOption>,
    ) -> WorkflowResult<String> {
        let question_id = self.next_question_id(kind);
        debug!(conversation = %self.id, %question_id, options = %options.len(), "Conversation::choose: called");
        let rx = self.pending.register(&question_id).await?;
        self.send(Outbound::Options {
            question_id: question_id.clone(),
            message: message.into(),
            options,
        })
        .await?;
        self.await_answer(&question_id, rx).await
    }

    async fn await_answer(&self, question_id: &str, rx: oneshot::Receiver<String>) -> WorkflowResult<String> {
        let answer = match self.answer_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(conversation = %self.id, %question_id, "Conversation::await_answer: timed out");
                    self.pending.discard(question_id).await;
                    return Err(WorkflowError::AnswerTimeout {
                        question_id: question_id.to_string(),
                    });
                }
            },
            None => rx.await,
        };
        match answer {
            Ok(text) => {
                info!(conversation = %self.id, %question_id, "Answer received");
                Ok(text)
            }
            Err(_) => {
                debug!(conversation = %self.id, %question_id, "Conversation::await_answer: cancelled");
                Err(WorkflowError::Cancelled)
            }
        }
    }
}
