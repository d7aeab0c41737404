//! Workflow Engine: drives Supervisor → worker → Supervisor until a terminal
//! route or the per-call step budget.
//!
//! Every role invocation works on a clone of the committed record; the clone
//! is committed and persisted only when the role succeeds. Calls for the same
//! thread id are serialised; distinct threads run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::{RoleError, WorkflowError};
use super::guardrails::GuardrailEngine;
use super::handlers::{RoleOutcome, Roster};
use super::oracle::SharedOracle;
use super::role::Role;
use super::state::{Author, PendingInput, StateRecord, Status, ThreadId};
use crate::checkpoint::SharedCheckpointStore;
use crate::events::{EventBus, SharedEventBus, StepEvent};

/// Human decision on a thread handed off for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    /// Replace the draft content with this text and re-review.
    Edit(String),
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Edit(_) => "edit",
        }
    }
}

/// What one `run_step`/`resolve` call did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: StateRecord,
    /// Role invocations made, Supervisor included.
    pub steps: u32,
    pub oracle_calls: u32,
    pub budget_exhausted: bool,
    pub duration_ms: u64,
}

type ThreadLocks = Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>;

pub struct WorkflowEngine {
    store: SharedCheckpointStore,
    roster: Roster,
    guardrails: GuardrailEngine,
    events: SharedEventBus,
    locks: ThreadLocks,
}

impl WorkflowEngine {
    pub fn new(
        store: SharedCheckpointStore,
        oracle: SharedOracle,
        guardrails: GuardrailEngine,
    ) -> Self {
        Self {
            store,
            roster: Roster::new(oracle, guardrails.clone()),
            guardrails,
            events: EventBus::new().shared(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Publish step events on an existing bus.
    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn guardrails(&self) -> &GuardrailEngine {
        &self.guardrails
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.events.subscribe()
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    // ── Public operations ────────────────────────────────────────────

    /// Advance a thread, creating it if absent.
    ///
    /// Runs until the thread reaches `waitingApproval`/`maxRevisionsExceeded`
    /// or the step budget is used up, persisting after each step.
    pub async fn run_step(
        &self,
        thread_id: &str,
        user_message: Option<&str>,
    ) -> Result<StateRecord, WorkflowError> {
        self.run_step_report(thread_id, user_message)
            .await
            .map(|report| report.state)
    }

    /// [`run_step`](Self::run_step) with run statistics.
    pub async fn run_step_report(
        &self,
        thread_id: &str,
        user_message: Option<&str>,
    ) -> Result<RunReport, WorkflowError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;
        let span = info_span!("foundry.run_step", thread_id = %thread_id);

        async move {
            let started = Instant::now();
            let message = user_message.map(str::trim).filter(|m| !m.is_empty());
            let mut state = match self.load(thread_id).await? {
                Some(state) => state,
                None if message.is_some() => StateRecord::new(thread_id),
                None => return Err(WorkflowError::EmptyRequest),
            };

            match message {
                Some(text) => state.accept_user_message(text),
                None if state.request.is_none() => return Err(WorkflowError::EmptyRequest),
                None if state.status.is_terminal() => {
                    debug!(status = %state.status, "Nothing to do for terminal thread");
                    return Ok(RunReport {
                        state,
                        steps: 0,
                        oracle_calls: 0,
                        budget_exhausted: false,
                        duration_ms: elapsed_ms(started),
                    });
                }
                None => {}
            }

            if state.status != Status::Running {
                state.set_status(Status::Running)?;
            }
            state.commit();
            self.persist(&state).await?;

            self.events.publish(StepEvent::RunStarted {
                thread_id: state.thread_id.clone(),
                step: state.step,
                timestamp: Utc::now(),
            });

            self.drive(state, started).await
        }
        .instrument(span)
        .await
    }

    /// Apply a human decision.
    ///
    /// `Approve` moves `waitingApproval → approved` and is a no-op on an
    /// already approved thread. `Edit` adopts the text as a new draft version
    /// and runs the review cycle again.
    pub async fn resolve(
        &self,
        thread_id: &str,
        decision: Decision,
    ) -> Result<StateRecord, WorkflowError> {
        self.resolve_report(thread_id, decision)
            .await
            .map(|report| report.state)
    }

    pub async fn resolve_report(
        &self,
        thread_id: &str,
        decision: Decision,
    ) -> Result<RunReport, WorkflowError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;
        let span = info_span!(
            "foundry.resolve",
            thread_id = %thread_id,
            decision = decision.label()
        );

        async move {
            let started = Instant::now();
            let mut state = self
                .load(thread_id)
                .await?
                .ok_or_else(|| WorkflowError::ThreadNotFound(thread_id.to_string()))?;

            let invalid = |state: &StateRecord, reason: &str| WorkflowError::InvalidDecision {
                thread_id: thread_id.to_string(),
                status: state.status,
                reason: reason.to_string(),
            };

            match decision {
                Decision::Approve => {
                    match state.status {
                        Status::Approved => {
                            debug!("Already approved");
                            return Ok(RunReport {
                                state,
                                steps: 0,
                                oracle_calls: 0,
                                budget_exhausted: false,
                                duration_ms: elapsed_ms(started),
                            });
                        }
                        Status::WaitingApproval => {}
                        _ => {
                            return Err(invalid(
                                &state,
                                "only a draft waiting for approval can be approved",
                            ))
                        }
                    }
                    state.set_status(Status::Approved)?;
                    state.push_message(
                        Author::Human,
                        format!("Approved version {}", state.current_version()),
                    );
                    state.next_worker = None;
                    state.commit();
                    self.persist(&state).await?;
                    self.publish_resolved(&state, "approve");
                    info!(revision = state.revision_count, "Draft approved");
                    Ok(RunReport {
                        state,
                        steps: 0,
                        oracle_calls: 0,
                        budget_exhausted: false,
                        duration_ms: elapsed_ms(started),
                    })
                }
                Decision::Edit(text) => {
                    if text.trim().is_empty() {
                        return Err(invalid(&state, "edit text is empty"));
                    }
                    if state.draft.is_none() {
                        return Err(invalid(&state, "there is no draft to edit"));
                    }
                    if !state.status.is_terminal() {
                        return Err(invalid(&state, "the automated review is still in progress"));
                    }
                    state.push_message(Author::Human, "Edited the draft");
                    state.pending_input = Some(PendingInput::Edit(text));
                    state.set_status(Status::Running)?;
                    state.commit();
                    self.persist(&state).await?;
                    self.publish_resolved(&state, "edit");
                    self.drive(state, started).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Latest committed record for a thread.
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<StateRecord>, WorkflowError> {
        self.load(thread_id).await
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadId>, WorkflowError> {
        self.store
            .list_threads()
            .await
            .map_err(|source| WorkflowError::Persistence {
                thread_id: String::new(),
                source,
                snapshot: None,
            })
    }

    // ── Run loop ─────────────────────────────────────────────────────

    async fn drive(
        &self,
        mut state: StateRecord,
        started: Instant,
    ) -> Result<RunReport, WorkflowError> {
        let mut steps: u32 = 0;
        let mut oracle_calls: u32 = 0;
        let mut budget_exhausted = false;

        loop {
            let guard = self.guardrails.evaluate(steps);
            if guard.should_stop() {
                info!(steps, outcome = %guard, "Step budget exhausted; pausing run");
                budget_exhausted = true;
                break;
            }

            let outcome = self.invoke(Role::Supervisor, &state).await?;
            steps += 1;
            state = outcome.state;
            state.commit();
            self.persist(&state).await?;

            let Some(decision) = outcome.route else {
                break;
            };
            if let Some(anomaly) = decision.anomaly.clone() {
                self.events.publish(StepEvent::AnomalyHealed {
                    thread_id: state.thread_id.clone(),
                    detail: anomaly,
                    timestamp: Utc::now(),
                });
            }
            self.events.publish(StepEvent::Routed {
                thread_id: state.thread_id.clone(),
                phase: decision.phase,
                route: decision.route,
                step: state.step,
                timestamp: Utc::now(),
            });

            let Some(worker) = decision.route.worker() else {
                break;
            };

            let mut input = state.clone();
            input.next_worker = None;
            let outcome = self.invoke(worker, &input).await?;
            steps += 1;
            if outcome.oracle_called {
                oracle_calls += 1;
            }
            state = outcome.state;
            state.commit();
            self.persist(&state).await?;

            self.events.publish(StepEvent::RoleCompleted {
                thread_id: state.thread_id.clone(),
                role: worker,
                revision: state.revision_count,
                step: state.step,
                summary: state
                    .messages
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
                timestamp: Utc::now(),
            });
        }

        self.events.publish(StepEvent::RunFinished {
            thread_id: state.thread_id.clone(),
            status: state.status,
            revision: state.revision_count,
            step: state.step,
            budget_exhausted,
            timestamp: Utc::now(),
        });
        info!(
            status = %state.status,
            revision = state.revision_count,
            steps,
            oracle_calls,
            "Run finished"
        );

        Ok(RunReport {
            state,
            steps,
            oracle_calls,
            budget_exhausted,
            duration_ms: elapsed_ms(started),
        })
    }

    /// Invoke one role. On failure the committed record is left as is and
    /// the error carries it with a system message appended.
    async fn invoke(
        &self,
        role: Role,
        state: &StateRecord,
    ) -> Result<RoleOutcome, WorkflowError> {
        debug!(role = %role, step = state.step, "Invoking role");
        match self.roster.handler(role).invoke(state).await {
            Ok(outcome) => Ok(outcome),
            Err(source) => Err(self.fail(state, role, source).await),
        }
    }

    /// Record a role failure.
    ///
    /// The role's output is discarded. The failure message itself is
    /// committed on top of the last good record (bumping `step`) and written
    /// best-effort, so the thread history shows every failure across
    /// restarts. The same record travels in the returned error.
    async fn fail(&self, committed: &StateRecord, role: Role, source: RoleError) -> WorkflowError {
        warn!(role = %role, error = %source, category = %source.retry_category(), "Role invocation failed");

        let mut snapshot = committed.clone();
        snapshot.push_message(
            Author::System,
            format!("{} failed: {}", role.label(), source),
        );
        snapshot.commit();
        if let Err(e) = self.store.put(&snapshot.thread_id, &snapshot).await {
            warn!(error = %e, "Could not record failure message");
        }

        self.events.publish(StepEvent::StepFailed {
            thread_id: snapshot.thread_id.clone(),
            role: Some(role),
            error: source.to_string(),
            timestamp: Utc::now(),
        });

        WorkflowError::Role {
            thread_id: snapshot.thread_id.clone(),
            role,
            source,
            snapshot: Box::new(snapshot),
        }
    }

    // ── Store access ─────────────────────────────────────────────────

    async fn load(&self, thread_id: &str) -> Result<Option<StateRecord>, WorkflowError> {
        self.store
            .get(thread_id)
            .await
            .map_err(|source| WorkflowError::Persistence {
                thread_id: thread_id.to_string(),
                source,
                snapshot: None,
            })
    }

    async fn persist(&self, state: &StateRecord) -> Result<(), WorkflowError> {
        match self.store.put(&state.thread_id, state).await {
            Ok(()) => Ok(()),
            Err(source) => {
                warn!(error = %source, step = state.step, "Checkpoint write failed; halting run");
                let mut snapshot = state.clone();
                snapshot.push_message(
                    Author::System,
                    format!("Checkpoint write failed; state may be stale: {}", source),
                );
                self.events.publish(StepEvent::StepFailed {
                    thread_id: state.thread_id.clone(),
                    role: None,
                    error: source.to_string(),
                    timestamp: Utc::now(),
                });
                Err(WorkflowError::Persistence {
                    thread_id: state.thread_id.clone(),
                    source,
                    snapshot: Some(Box::new(snapshot)),
                })
            }
        }
    }

    fn publish_resolved(&self, state: &StateRecord, decision: &str) {
        self.events.publish(StepEvent::Resolved {
            thread_id: state.thread_id.clone(),
            decision: decision.to_string(),
            status: state.status,
            timestamp: Utc::now(),
        });
    }

    /// Per-thread async lock. Entries no caller holds are pruned.
    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
