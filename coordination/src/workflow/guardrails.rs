//! Revision and step guardrails for workflow runs.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::state::StateRecord;

/// Role invocations in one round: a Supervisor pass and the worker it routes to.
pub const STEPS_PER_ROUND: u32 = 2;

/// Outcome of a guardrail evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardrailOutcome {
    /// No guardrail triggered.
    Continue,
    /// No further Drafter revisions are allowed.
    RevisionLimitReached { revisions: u32 },
    /// The per-call step budget is used up; the run pauses.
    StepBudgetExhausted { steps: u32 },
}

impl GuardrailOutcome {
    /// Whether the run should stop.
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl std::fmt::Display for GuardrailOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::RevisionLimitReached { revisions } => {
                write!(f, "revision_limit_reached ({})", revisions)
            }
            Self::StepBudgetExhausted { steps } => {
                write!(f, "step_budget_exhausted ({} steps)", steps)
            }
        }
    }
}

/// Configuration for workflow guardrails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Maximum number of draft versions per thread before a rejection becomes
    /// terminal.
    pub max_revisions: u32,
    /// Maximum role invocations (Supervisor included) per `run_step` call.
    /// Values below [`STEPS_PER_ROUND`] are raised to it.
    pub step_budget: u32,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_revisions: 5,
            step_budget: 24,
        }
    }
}

/// Evaluates guardrails against a state record.
#[derive(Debug, Clone, Default)]
pub struct GuardrailEngine {
    config: GuardrailConfig,
}

impl GuardrailEngine {
    pub fn new(mut config: GuardrailConfig) -> Self {
        if config.step_budget < STEPS_PER_ROUND {
            warn!(
                step_budget = config.step_budget,
                minimum = STEPS_PER_ROUND,
                "Step budget too small for one round; raising it"
            );
            config.step_budget = STEPS_PER_ROUND;
        }
        Self { config }
    }

    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Whether the Drafter may produce another version after a rejection.
    pub fn revision_allowed(&self, state: &StateRecord) -> bool {
        state.revision_count < self.config.max_revisions
    }

    /// Consulted by routing when a reviewer rejects the current draft.
    pub fn check_revision(&self, state: &StateRecord) -> GuardrailOutcome {
        if self.revision_allowed(state) {
            GuardrailOutcome::Continue
        } else {
            GuardrailOutcome::RevisionLimitReached {
                revisions: state.revision_count,
            }
        }
    }

    /// Evaluate before each Supervisor pass.
    ///
    /// `steps_taken` counts role invocations already made in this call. A
    /// round only starts when the Supervisor and its worker both fit, so a
    /// routed worker always runs in the same call.
    pub fn evaluate(&self, steps_taken: u32) -> GuardrailOutcome {
        if steps_taken + STEPS_PER_ROUND > self.config.step_budget {
            return GuardrailOutcome::StepBudgetExhausted { steps: steps_taken };
        }
        GuardrailOutcome::Continue
    }
}
