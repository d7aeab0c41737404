//! Supervisor routing: a pure function from State Record to route.
//!
//! The phase is derived from the record, never stored:
//!
//! ```text
//! Start            draft == None                          → Drafter
//! HumanRevision    pending human input                    → Drafter
//! AwaitingSafety   no safety critique for current version → SafetyGuardian
//! SafetyRejected   safety rejected current version        → Drafter | RevisionLimit
//! AwaitingClinical safety approved, no clinical critique  → ClinicalCritic
//! ClinicalRejected clinical rejected current version      → Drafter | RevisionLimit
//! BothApproved     both approved current version          → HumanReview
//! ```
//!
//! Critiques are matched on their stamped draft version, so a verdict on an
//! older version never satisfies the current one.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::guardrails::{GuardrailEngine, GuardrailOutcome};
use super::role::{Reviewer, Route};
use super::state::{Critique, StateRecord};

/// Phase derived from the state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    HumanRevision,
    AwaitingSafety,
    SafetyRejected,
    AwaitingClinical,
    ClinicalRejected,
    BothApproved,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::HumanRevision => write!(f, "human_revision"),
            Self::AwaitingSafety => write!(f, "awaiting_safety"),
            Self::SafetyRejected => write!(f, "safety_rejected"),
            Self::AwaitingClinical => write!(f, "awaiting_clinical"),
            Self::ClinicalRejected => write!(f, "clinical_rejected"),
            Self::BothApproved => write!(f, "both_approved"),
        }
    }
}

/// A routing decision and why it was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub phase: Phase,
    pub route: Route,
    pub reason: String,
    /// Set when the critique log was inconsistent and got discounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<String>,
}

/// Find the last critique that cannot be trusted, if any.
///
/// Critiques at or before the returned index are ignored, which forces both
/// reviewers to look at the current version again.
fn anomaly_horizon(state: &StateRecord) -> Option<(usize, String)> {
    let current = state.current_version();
    let mut horizon: Option<(usize, String)> = None;

    for (idx, critique) in state.critiques.iter().enumerate() {
        if critique.draft_version == 0 || critique.draft_version > current {
            horizon = Some((
                idx,
                format!(
                    "{} critique references draft version {} but current version is {}",
                    critique.author, critique.draft_version, current
                ),
            ));
        }
    }

    if let Some(last) = state.latest_critique() {
        if state.last_reviewer != Some(last.author) {
            let idx = state.critiques.len() - 1;
            if horizon.as_ref().map_or(true, |(h, _)| *h < idx) {
                horizon = Some((
                    idx,
                    format!(
                        "last reviewer {:?} does not match latest critique author {}",
                        state.last_reviewer, last.author
                    ),
                ));
            }
        }
    }

    horizon
}

fn verdict<'a>(
    state: &'a StateRecord,
    reviewer: Reviewer,
    horizon: Option<usize>,
) -> Option<&'a Critique> {
    let version = state.current_version();
    state
        .critiques
        .iter()
        .enumerate()
        .rev()
        .take_while(|(idx, _)| horizon.map_or(true, |h| *idx > h))
        .map(|(_, c)| c)
        .find(|c| c.author == reviewer && c.draft_version == version)
}

fn after_rejection(
    state: &StateRecord,
    guardrails: &GuardrailEngine,
    phase: Phase,
    reviewer: Reviewer,
) -> (Route, String) {
    match guardrails.check_revision(state) {
        GuardrailOutcome::RevisionLimitReached { revisions } => (
            Route::RevisionLimit,
            format!(
                "{} rejected version {} ({}) and the limit of {} revisions is reached",
                reviewer,
                state.current_version(),
                phase,
                revisions
            ),
        ),
        _ => (
            Route::Drafter,
            format!(
                "{} rejected version {}; requesting revision",
                reviewer,
                state.current_version()
            ),
        ),
    }
}

/// Decide the next route. Pure: same record in, same decision out.
pub fn route(state: &StateRecord, guardrails: &GuardrailEngine) -> RouteDecision {
    if state.draft.is_none() {
        return RouteDecision {
            phase: Phase::Start,
            route: Route::Drafter,
            reason: "no draft yet".to_string(),
            anomaly: None,
        };
    }

    if state.pending_input.is_some() {
        return RouteDecision {
            phase: Phase::HumanRevision,
            route: Route::Drafter,
            reason: "human input pending".to_string(),
            anomaly: None,
        };
    }

    let anomaly = anomaly_horizon(state);
    let horizon = anomaly.as_ref().map(|(idx, _)| *idx);
    let anomaly = anomaly.map(|(_, msg)| msg);
    let version = state.current_version();

    let (phase, route, reason) = match verdict(state, Reviewer::SafetyGuardian, horizon) {
        None => (
            Phase::AwaitingSafety,
            Route::SafetyGuardian,
            format!("version {} needs a safety review", version),
        ),
        Some(c) if !c.approved => {
            let (route, reason) =
                after_rejection(state, guardrails, Phase::SafetyRejected, c.author);
            (Phase::SafetyRejected, route, reason)
        }
        Some(_) => match verdict(state, Reviewer::ClinicalCritic, horizon) {
            None => (
                Phase::AwaitingClinical,
                Route::ClinicalCritic,
                format!("version {} passed safety; needs clinical review", version),
            ),
            Some(c) if !c.approved => {
                let (route, reason) =
                    after_rejection(state, guardrails, Phase::ClinicalRejected, c.author);
                (Phase::ClinicalRejected, route, reason)
            }
            Some(_) => (
                Phase::BothApproved,
                Route::HumanReview,
                format!("version {} approved by both reviewers", version),
            ),
        },
    };

    RouteDecision {
        phase,
        route,
        reason,
        anomaly,
    }
}
