//! Registry of live conversations
//!
//! Maps a conversation id to its state, tenant context, pending-answer table
//! and running task. Each `open` bumps a generation counter so a finishing
//! task only releases the entry it created, never a replacement.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::pending::PendingAnswers;
use crate::domain::{ConversationState, TenantContext};

struct SessionEntry {
    state: Arc<Mutex<ConversationState>>,
    context: Arc<TenantContext>,
    pending: PendingAnswers,
    generation: u64,
    task: Option<AbortHandle>,
}

impl SessionEntry {
    async fn teardown(self) {
        self.pending.cancel_all().await;
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Handles a conversation task needs, returned by `SessionRegistry::open`
#[derive(Clone)]
pub struct SessionTicket {
    pub session_id: String,
    pub generation: u64,
    pub state: Arc<Mutex<ConversationState>>,
    pub context: Arc<TenantContext>,
    pub pending: PendingAnswers,
}

/// Shared, concurrency-safe registry of conversations
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    generation: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation, tearing down any existing one with the same id
    pub async fn open(&self, session_id: &str, state: ConversationState, context: TenantContext) -> SessionTicket {
        debug!(%session_id, "SessionRegistry::open: called");
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ticket = SessionTicket {
            session_id: session_id.to_string(),
            generation,
            state: Arc::new(Mutex::new(state)),
            context: Arc::new(context),
            pending: PendingAnswers::new(),
        };
        let entry = SessionEntry {
            state: ticket.state.clone(),
            context: ticket.context.clone(),
            pending: ticket.pending.clone(),
            generation,
            task: None,
        };

        let previous = self.sessions.write().await.insert(session_id.to_string(), entry);
        if let Some(previous) = previous {
            info!(%session_id, old_generation = %previous.generation, "Replacing active conversation");
            previous.teardown().await;
        }
        ticket
    }

    /// Attach the task driving a conversation so reset can abort it
    pub async fn attach(&self, session_id: &str, generation: u64, task: AbortHandle) -> bool {
        debug!(%session_id, %generation, "SessionRegistry::attach: called");
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(entry) if entry.generation == generation => {
                entry.task = Some(task);
                true
            }
            _ => {
                debug!(%session_id, "SessionRegistry::attach: entry gone or replaced");
                task.abort();
                false
            }
        }
    }

    /// Route an answer to the conversation's pending question
    pub async fn resolve(&self, session_id: &str, question_id: &str, answer: &str) -> bool {
        debug!(%session_id, %question_id, "SessionRegistry::resolve: called");
        let pending = match self.sessions.read().await.get(session_id) {
            Some(entry) => entry.pending.clone(),
            None => {
                debug!(%session_id, "SessionRegistry::resolve: no such conversation");
                return false;
            }
        };
        pending.resolve(question_id, answer).await
    }

    /// Drop a conversation: cancel its questions and abort its task
    pub async fn reset(&self, session_id: &str) -> bool {
        debug!(%session_id, "SessionRegistry::reset: called");
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(entry) => {
                info!(%session_id, "Conversation reset");
                entry.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Remove a finished conversation if it is still the given generation
    pub async fn release(&self, session_id: &str, generation: u64) -> bool {
        debug!(%session_id, %generation, "SessionRegistry::release: called");
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(session_id).map(|e| e.generation);
        if current != Some(generation) {
            debug!(%session_id, ?current, "SessionRegistry::release: generation mismatch");
            return false;
        }
        let removed = sessions.remove(session_id);
        drop(sessions);
        if let Some(entry) = removed {
            entry.pending.cancel_all().await;
        }
        true
    }

    /// Tenant context of a live conversation
    pub async fn context(&self, session_id: &str) -> Option<Arc<TenantContext>> {
        self.sessions.read().await.get(session_id).map(|e| e.context.clone())
    }

    /// Copy of a conversation's state, unless a step currently holds it
    pub async fn snapshot(&self, session_id: &str) -> Option<ConversationState> {
        let state = self.sessions.read().await.get(session_id).map(|e| e.state.clone())?;
        let guard = state.try_lock().ok()?;
        Some(guard.clone())
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
