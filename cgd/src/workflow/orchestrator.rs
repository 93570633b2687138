//! Conversation orchestrator
//!
//! Drives one conversation from the raw request to a terminal phase. Routing is
//! an exhaustive match on the phase each step returns; the recovery policy for
//! every error class lives in `run`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Services, StepContext, artifact, clarify, creation, extract, query, resolver, schedule};
use crate::domain::{ConversationState, Phase, TenantContext};
use crate::error::{WorkflowError, WorkflowResult};
use crate::session::{Conversation, Outbound, SessionRegistry};

/// Runs conversations against a shared set of services
#[derive(Clone)]
pub struct Orchestrator {
    services: Arc<Services>,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>) -> Self {
        debug!("Orchestrator::new: called");
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Drive `state` until it reaches a terminal phase
    ///
    /// Returns the terminal phase. Only internal-consistency failures are
    /// returned as errors; everything else is reported in chat and ends in
    /// `Done` or `Cancelled`.
    pub async fn run(
        &self,
        conversation: &Conversation,
        tenant: &TenantContext,
        state: &mut ConversationState,
    ) -> WorkflowResult<Phase> {
        debug!(conversation = %conversation.id(), phase = %state.phase, "Orchestrator::run: called");
        let cx = StepContext {
            services: &self.services,
            tenant,
            conversation,
        };
        let max_attempts = self.services.config.max_creation_attempts;
        let max_step_retries = self.services.config.max_step_retries.max(1);
        let mut failures = 0u32;

        while !state.phase.is_terminal() {
            let current = state.phase;
            match self.step(&cx, state).await {
                Ok(next) => {
                    failures = 0;
                    if next != current {
                        info!(conversation = %conversation.id(), from = %current, to = %next, "Phase transition");
                    }
                    state.phase = next;
                }
                Err(WorkflowError::Extraction(message)) => {
                    failures += 1;
                    warn!(conversation = %conversation.id(), phase = %current, %failures, error = %message, "Step failed, retrying phase");
                    if failures >= max_step_retries {
                        notify(
                            conversation,
                            format!(
                                "I couldn't complete this step after {} tries ({}). The campaign has been cancelled.",
                                failures, message
                            ),
                        )
                        .await;
                        state.phase = Phase::Cancelled;
                    } else {
                        notify(conversation, format!("Something went wrong: {}. Let me try that again.", message)).await;
                    }
                }
                Err(e @ (WorkflowError::Collaborator(_) | WorkflowError::Validation(_))) => {
                    warn!(conversation = %conversation.id(), phase = %current, kind = %e.kind(), error = %e, "Step failed, cancelling");
                    notify(conversation, format!("{}. The campaign has been cancelled.", e)).await;
                    state.phase = Phase::Cancelled;
                }
                Err(WorkflowError::AnswerTimeout { question_id }) => {
                    info!(conversation = %conversation.id(), %question_id, "No answer in time, cancelling");
                    notify(
                        conversation,
                        "I didn't hear back in time, so this campaign has been cancelled.".to_string(),
                    )
                    .await;
                    state.phase = Phase::Cancelled;
                }
                Err(WorkflowError::Cancelled) => {
                    debug!(conversation = %conversation.id(), phase = %current, "Orchestrator::run: cancelled");
                    state.phase = Phase::Cancelled;
                    return Ok(Phase::Cancelled);
                }
                Err(e @ WorkflowError::InternalConsistency(_)) => {
                    return Err(abort(conversation, e).await);
                }
            }

            if let Err(e) = state.check_invariants(max_attempts) {
                return Err(abort(conversation, e).await);
            }
        }

        info!(conversation = %conversation.id(), phase = %state.phase, "Conversation finished");
        Ok(state.phase)
    }

    async fn step(&self, cx: &StepContext<'_>, state: &mut ConversationState) -> WorkflowResult<Phase> {
        debug!(phase = %state.phase, "Orchestrator::step: called");
        match state.phase {
            Phase::Parse => extract::parse_step(cx, state).await,
            Phase::Clarify => clarify::clarify_step(cx, state).await,
            Phase::ResolveSegment => resolver::resolve_step(cx, state).await,
            Phase::SelectSegment => resolver::select_step(cx, state).await,
            Phase::ConfirmCreate => resolver::confirm_create_step(cx, state).await,
            Phase::GenerateQuery => query::generate_step(cx, state).await,
            Phase::CreateSegment => creation::create_step(cx, state).await,
            Phase::ReviewSegment => query::review_segment_step(cx, state).await,
            Phase::RetryCreate => creation::retry_step(cx, state).await,
            Phase::ManualFallback => creation::manual_fallback_step(cx, state).await,
            Phase::CreateArtifact => artifact::create_artifact_step(cx, state).await,
            Phase::ReviewArtifact => artifact::review_artifact_step(cx, state).await,
            Phase::ConfirmSchedule => schedule::confirm_schedule_step(cx, state).await,
            Phase::ReviewSchedule => schedule::review_schedule_step(cx, state).await,
            Phase::Schedule => schedule::schedule_step(cx, state).await,
            Phase::Done | Phase::Cancelled => Err(WorkflowError::InternalConsistency(format!(
                "step requested for terminal phase {}",
                state.phase
            ))),
        }
    }

    /// Register a new conversation and spawn the task driving it
    ///
    /// Any conversation already registered under `session_id` is torn down
    /// first. The task releases its registry entry when it finishes.
    pub async fn start(
        &self,
        registry: &SessionRegistry,
        session_id: &str,
        request: String,
        tenant: TenantContext,
        outbox: mpsc::Sender<Outbound>,
    ) -> JoinHandle<WorkflowResult<Phase>> {
        debug!(%session_id, "Orchestrator::start: called");
        let ticket = registry.open(session_id, ConversationState::new(request), tenant).await;
        let conversation = Conversation::new(
            session_id,
            outbox,
            ticket.pending.clone(),
            self.services.config.answer_timeout(),
        );

        let orchestrator = self.clone();
        let task_registry = registry.clone();
        let task_ticket = ticket.clone();
        let handle = tokio::spawn(async move {
            let result = {
                let mut state = task_ticket.state.lock().await;
                orchestrator.run(&conversation, &task_ticket.context, &mut state).await
            };
            task_registry
                .release(&task_ticket.session_id, task_ticket.generation)
                .await;
            result
        });

        registry
            .attach(session_id, ticket.generation, handle.abort_handle())
            .await;
        handle
    }
}

/// Send a chat message on an error path; a departed client is not an error here
async fn notify(conversation: &Conversation, message: String) {
    if let Err(e) = conversation.error(message).await {
        debug!(conversation = %conversation.id(), error = %e, "notify: client gone");
    }
}

/// Report an internal-consistency failure loudly and hand it back
async fn abort(conversation: &Conversation, err: WorkflowError) -> WorkflowError {
    error!(conversation = %conversation.id(), error = %err, "Conversation aborted");
    notify(
        conversation,
        "An internal error occurred and this conversation had to stop. Please start again.".to_string(),
    )
    .await;
    err
}
