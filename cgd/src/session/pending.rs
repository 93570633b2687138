//! Questions waiting on a human answer
//!
//! Each conversation owns one table mapping question id to the single-shot
//! sender that resumes the waiting step. The first resolution wins and removes
//! the entry; teardown drops every sender so waiting steps see cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::error::{WorkflowError, WorkflowResult};

#[derive(Default)]
struct PendingTable {
    waiting: HashMap<String, oneshot::Sender<String>>,
    closed: bool,
}

/// Per-conversation table of outstanding questions
#[derive(Clone, Default)]
pub struct PendingAnswers {
    inner: Arc<Mutex<PendingTable>>,
}

impl PendingAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a question and get the receiver its answer will arrive on
    ///
    /// Must be called before the question is sent so a fast answer is never
    /// lost.
    pub async fn register(&self, question_id: &str) -> WorkflowResult<oneshot::Receiver<String>> {
        debug!(%question_id, "PendingAnswers::register: called");
        let mut table = self.inner.lock().await;
        if table.closed {
            debug!(%question_id, "PendingAnswers::register: table closed");
            return Err(WorkflowError::Cancelled);
        }
        if table.waiting.contains_key(question_id) {
            return Err(WorkflowError::InternalConsistency(format!(
                "question id '{}' registered twice",
                question_id
            )));
        }
        let (tx, rx) = oneshot::channel();
        table.waiting.insert(question_id.to_string(), tx);
        Ok(rx)
    }

    /// Deliver an answer; returns false if nothing was waiting on this id
    pub async fn resolve(&self, question_id: &str, answer: impl Into<String>) -> bool {
        debug!(%question_id, "PendingAnswers::resolve: called");
        let sender = self.inner.lock().await.waiting.remove(question_id);
        match sender {
            Some(tx) => {
                let delivered = tx.send(answer.into()).is_ok();
                if !delivered {
                    warn!(%question_id, "PendingAnswers::resolve: waiter already gone");
                }
                delivered
            }
            None => {
                debug!(%question_id, "PendingAnswers::resolve: no pending question");
                false
            }
        }
    }

    /// Forget a question without answering it
    pub async fn discard(&self, question_id: &str) -> bool {
        debug!(%question_id, "PendingAnswers::discard: called");
        self.inner.lock().await.waiting.remove(question_id).is_some()
    }

    /// Close the table and drop every waiting sender
    pub async fn cancel_all(&self) -> usize {
        let mut table = self.inner.lock().await;
        table.closed = true;
        let count = table.waiting.len();
        table.waiting.clear();
        debug!(%count, "PendingAnswers::cancel_all: cancelled outstanding questions");
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.waiting.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, question_id: &str) -> bool {
        self.inner.lock().await.waiting.contains_key(question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_answer() {
        let pending = PendingAnswers::new();
        let rx = pending.register("q1").await.unwrap();
        assert!(pending.contains("q1").await);

        assert!(pending.resolve("q1", "yes").await);
        assert_eq!(rx.await.unwrap(), "yes");
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_second_resolution_has_no_effect() {
        let pending = PendingAnswers::new();
        let rx = pending.register("q1").await.unwrap();

        assert!(pending.resolve("q1", "first").await);
        assert!(!pending.resolve("q1", "second").await);
        assert_eq!(rx.await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_unknown_question_is_ignored() {
        let pending = PendingAnswers::new();
        assert!(!pending.resolve("nope", "x").await);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let pending = PendingAnswers::new();
        let _rx = pending.register("q1").await.unwrap();
        assert!(matches!(
            pending.register("q1").await,
            Err(WorkflowError::InternalConsistency(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_waiters_and_closes() {
        let pending = PendingAnswers::new();
        let rx = pending.register("q1").await.unwrap();

        assert_eq!(pending.cancel_all().await, 1);
        assert!(rx.await.is_err());
        assert!(matches!(pending.register("q2").await, Err(WorkflowError::Cancelled)));
    }

    #[tokio::test]
    async fn test_discard_removes_entry() {
        let pending = PendingAnswers::new();
        let _rx = pending.register("q1").await.unwrap();
        assert!(pending.discard("q1").await);
        assert!(!pending.resolve("q1", "late").await);
    }
}
