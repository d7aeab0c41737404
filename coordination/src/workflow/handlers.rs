//! Role handlers.
//!
//! Each handler reads `&StateRecord` and returns an updated copy. Every
//! handler appends exactly one entry to `messages`; reviewers also append
//! exactly one critique. Only the Supervisor returns a route.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::RoleError;
use super::guardrails::GuardrailEngine;
use super::oracle::{preview, DraftFields, DrafterBrief, OracleError, ReviewFields, SharedOracle};
use super::role::{Reviewer, Role, Route};
use super::routing::{self, RouteDecision};
use super::state::{
    AgentNote, Author, Critique, DraftVersion, NotePriority, ScoreKind, StateRecord, Status,
};

/// Result of one role invocation.
#[derive(Debug, Clone)]
pub struct RoleOutcome {
    pub state: StateRecord,
    /// Populated by the Supervisor only.
    pub route: Option<RouteDecision>,
    /// Whether the handler called the oracle.
    pub oracle_called: bool,
}

#[async_trait]
pub trait RoleHandler: Send + Sync {
    fn role(&self) -> Role;

    async fn invoke(&self, state: &StateRecord) -> Result<RoleOutcome, RoleError>;
}

// ── Drafter ──────────────────────────────────────────────────────────

pub struct DrafterHandler {
    oracle: SharedOracle,
}

impl DrafterHandler {
    pub fn new(oracle: SharedOracle) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl RoleHandler for DrafterHandler {
    fn role(&self) -> Role {
        Role::Drafter
    }

    async fn invoke(&self, state: &StateRecord) -> Result<RoleOutcome, RoleError> {
        let role = Role::Drafter;
        let brief = DrafterBrief::from_state(state).ok_or(if state.draft.is_some() {
            RoleError::NothingToRevise { role }
        } else {
            RoleError::MissingRequest { role }
        })?;
        let kind = brief.kind();
        let oracle_called = brief.needs_oracle();

        let (draft, notes, created_by) = match brief {
            DrafterBrief::Edit { draft, content } => {
                let mut edited = draft.clone();
                edited.content = content.to_string();
                (
                    edited,
                    "human edit adopted verbatim".to_string(),
                    Author::Human,
                )
            }
            _ => {
                let reply = self
                    .oracle
                    .complete(role, state)
                    .await
                    .map_err(|source| RoleError::Oracle { role, source })?;
                let fields: DraftFields = reply
                    .parse()
                    .map_err(|source| RoleError::Oracle { role, source })?;
                fields
                    .validate()
                    .map_err(|source| RoleError::Oracle { role, source })?;
                let (draft, notes) = fields.into_draft();
                (draft, notes.unwrap_or_default(), Author::Agent(role))
            }
        };

        let mut next = state.clone();
        next.revision_count += 1;
        let version = next.revision_count;
        next.draft_history.push(DraftVersion {
            version,
            draft: draft.clone(),
            created_by,
            notes: notes.clone(),
            timestamp: chrono::Utc::now(),
        });
        next.push_message(
            Author::Agent(role),
            format!("Drafted version {} ({}): {}", version, kind, draft.title),
        );
        next.draft = Some(draft);
        next.pending_input = None;

        let mut note = format!("version {} from {} brief", version, kind);
        if !notes.is_empty() {
            note.push_str(": ");
            note.push_str(&notes);
        }
        next.scratchpad
            .push(AgentNote::new(role, NotePriority::Info, note));

        debug!(thread_id = %state.thread_id, revision = version, kind, "Drafter produced version");
        Ok(RoleOutcome {
            state: next,
            route: None,
            oracle_called,
        })
    }
}

// ── Reviewers ────────────────────────────────────────────────────────

pub struct ReviewerHandler {
    reviewer: Reviewer,
    oracle: SharedOracle,
}

impl ReviewerHandler {
    pub fn new(reviewer: Reviewer, oracle: SharedOracle) -> Self {
        Self { reviewer, oracle }
    }

    fn record_scores(
        &self,
        state: &mut StateRecord,
        fields: &ReviewFields,
    ) -> Result<(), OracleError> {
        let writes = match self.reviewer {
            Reviewer::SafetyGuardian => vec![(ScoreKind::Safety, fields.score)],
            Reviewer::ClinicalCritic => vec![
                (ScoreKind::Empathy, fields.empathy_score),
                (ScoreKind::Clarity, fields.clarity_score),
            ],
        };
        for (kind, value) in writes {
            if let Some(value) = value {
                state
                    .scores
                    .record(self.reviewer, kind, value)
                    .map_err(|e| OracleError::Malformed(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn primary_score(&self, fields: &ReviewFields) -> Option<f64> {
        match self.reviewer {
            Reviewer::SafetyGuardian => fields.score,
            Reviewer::ClinicalCritic => fields.score.or(fields.empathy_score),
        }
        .map(|s| s.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl RoleHandler for ReviewerHandler {
    fn role(&self) -> Role {
        self.reviewer.role()
    }

    async fn invoke(&self, state: &StateRecord) -> Result<RoleOutcome, RoleError> {
        let role = self.role();
        if state.draft.is_none() {
            return Err(RoleError::MissingDraft { role });
        }

        let reply = self
            .oracle
            .complete(role, state)
            .await
            .map_err(|source| RoleError::Oracle { role, source })?;
        let fields: ReviewFields = reply
            .parse()
            .map_err(|source| RoleError::Oracle { role, source })?;
        fields
            .validate()
            .map_err(|source| RoleError::Oracle { role, source })?;

        let mut next = state.clone();
        self.record_scores(&mut next, &fields)
            .map_err(|source| RoleError::Oracle { role, source })?;

        let version = state.current_version();
        next.critiques.push(Critique {
            author: self.reviewer,
            content: fields.critique.clone(),
            approved: fields.approved,
            score: self.primary_score(&fields),
            draft_version: version,
            timestamp: chrono::Utc::now(),
        });
        next.last_reviewer = Some(self.reviewer);

        let verdict = if fields.approved { "approved" } else { "rejected" };
        next.push_message(
            Author::Agent(role),
            format!(
                "{} {} version {}: {}",
                role.label(),
                verdict,
                version,
                preview(&fields.critique, 200)
            ),
        );
        if !fields.approved {
            next.scratchpad.push(
                AgentNote::new(role, NotePriority::Warning, fields.critique.clone())
                    .for_role(Role::Drafter),
            );
        }

        debug!(
            thread_id = %state.thread_id,
            role = %role,
            revision = version,
            approved = fields.approved,
            "Review recorded"
        );
        Ok(RoleOutcome {
            state: next,
            route: None,
            oracle_called: true,
        })
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

/// Routes with the pure routing function. Makes no oracle call.
pub struct SupervisorHandler {
    guardrails: GuardrailEngine,
}

impl SupervisorHandler {
    pub fn new(guardrails: GuardrailEngine) -> Self {
        Self { guardrails }
    }
}

#[async_trait]
impl RoleHandler for SupervisorHandler {
    fn role(&self) -> Role {
        Role::Supervisor
    }

    async fn invoke(&self, state: &StateRecord) -> Result<RoleOutcome, RoleError> {
        let role = Role::Supervisor;
        let decision = routing::route(state, &self.guardrails);
        let mut next = state.clone();

        if let Some(anomaly) = &decision.anomaly {
            warn!(thread_id = %state.thread_id, anomaly = %anomaly, "Critique log inconsistent; forcing re-review");
            next.scratchpad.push(AgentNote::new(
                role,
                NotePriority::Critical,
                format!("re-review forced: {}", anomaly),
            ));
        }

        match decision.route {
            Route::HumanReview => next.set_status(Status::WaitingApproval)?,
            Route::RevisionLimit => next.set_status(Status::MaxRevisionsExceeded)?,
            Route::Drafter | Route::SafetyGuardian | Route::ClinicalCritic => {}
        }

        next.next_worker = Some(decision.route);
        next.push_message(
            Author::Agent(role),
            format!("{} → {}: {}", decision.phase, decision.route, decision.reason),
        );

        debug!(
            thread_id = %state.thread_id,
            phase = %decision.phase,
            route = %decision.route,
            "Supervisor routed"
        );
        Ok(RoleOutcome {
            state: next,
            route: Some(decision),
            oracle_called: false,
        })
    }
}

// ── Roster ───────────────────────────────────────────────────────────

/// One handler per role; dispatch is an exhaustive match.
pub struct Roster {
    drafter: DrafterHandler,
    safety: ReviewerHandler,
    clinical: ReviewerHandler,
    supervisor: SupervisorHandler,
}

impl Roster {
    pub fn new(oracle: SharedOracle, guardrails: GuardrailEngine) -> Self {
        Self {
            drafter: DrafterHandler::new(oracle.clone()),
            safety: ReviewerHandler::new(Reviewer::SafetyGuardian, oracle.clone()),
            clinical: ReviewerHandler::new(Reviewer::ClinicalCritic, oracle),
            supervisor: SupervisorHandler::new(guardrails),
        }
    }

    pub fn handler(&self, role: Role) -> &dyn RoleHandler {
        match role {
            Role::Drafter => &self.drafter,
            Role::SafetyGuardian => &self.safety,
            Role::ClinicalCritic => &self.clinical,
            Role::Supervisor => &self.supervisor,
        }
    }
}
