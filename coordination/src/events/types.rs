//! Event types published by the workflow engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::role::{Role, Route};
use crate::workflow::routing::Phase;
use crate::workflow::state::{Status, ThreadId};

/// Everything a run can report while it progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// `run_step` picked up a thread.
    RunStarted {
        thread_id: ThreadId,
        step: u64,
        timestamp: DateTime<Utc>,
    },

    /// The Supervisor chose the next route.
    Routed {
        thread_id: ThreadId,
        phase: Phase,
        route: Route,
        step: u64,
        timestamp: DateTime<Utc>,
    },

    /// A worker role finished and its step was committed.
    RoleCompleted {
        thread_id: ThreadId,
        role: Role,
        revision: u32,
        step: u64,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    /// An inconsistent critique log was discounted.
    AnomalyHealed {
        thread_id: ThreadId,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// The run stopped: terminal status or step budget.
    RunFinished {
        thread_id: ThreadId,
        status: Status,
        revision: u32,
        step: u64,
        budget_exhausted: bool,
        timestamp: DateTime<Utc>,
    },

    /// A step failed and nothing was committed for it.
    StepFailed {
        thread_id: ThreadId,
        role: Option<Role>,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A human decision was applied.
    Resolved {
        thread_id: ThreadId,
        decision: String,
        status: Status,
        timestamp: DateTime<Utc>,
    },
}

impl StepEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StepEvent::RunStarted { timestamp, .. } => *timestamp,
            StepEvent::Routed { timestamp, .. } => *timestamp,
            StepEvent::RoleCompleted { timestamp, .. } => *timestamp,
            StepEvent::AnomalyHealed { timestamp, .. } => *timestamp,
            StepEvent::RunFinished { timestamp, .. } => *timestamp,
            StepEvent::StepFailed { timestamp, .. } => *timestamp,
            StepEvent::Resolved { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            StepEvent::RunStarted { .. } => "run_started",
            StepEvent::Routed { .. } => "routed",
            StepEvent::RoleCompleted { .. } => "role_completed",
            StepEvent::AnomalyHealed { .. } => "anomaly_healed",
            StepEvent::RunFinished { .. } => "run_finished",
            StepEvent::StepFailed { .. } => "step_failed",
            StepEvent::Resolved { .. } => "resolved",
        }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            StepEvent::RunStarted { thread_id, .. }
            | StepEvent::Routed { thread_id, .. }
            | StepEvent::RoleCompleted { thread_id, .. }
            | StepEvent::AnomalyHealed { thread_id, .. }
            | StepEvent::RunFinished { thread_id, .. }
            | StepEvent::StepFailed { thread_id, .. }
            | StepEvent::Resolved { thread_id, .. } => thread_id,
        }
    }

    /// One-line progress text for terminal output.
    pub fn describe(&self) -> String {
        match self {
            StepEvent::RunStarted { step, .. } => format!("run started at step {}", step),
            StepEvent::Routed { phase, route, .. } => format!("{} → {}", phase, route),
            StepEvent::RoleCompleted { role, summary, .. } => {
                format!("{}: {}", role.label(), summary)
            }
            StepEvent::AnomalyHealed { detail, .. } => format!("re-review forced: {}", detail),
            StepEvent::RunFinished {
                status,
                revision,
                budget_exhausted,
                ..
            } => {
                if *budget_exhausted {
                    format!("paused (step budget) at revision {} [{}]", revision, status)
                } else {
                    format!("finished at revision {} [{}]", revision, status)
                }
            }
            StepEvent::StepFailed { role, error, .. } => match role {
                Some(role) => format!("{} failed: {}", role.label(), error),
                None => format!("step failed: {}", error),
            },
            StepEvent::Resolved {
                decision, status, ..
            } => format!("human decision '{}' → {}", decision, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StepEvent::Routed {
            thread_id: "t-1".to_string(),
            phase: Phase::AwaitingSafety,
            route: Route::SafetyGuardian,
            step: 3,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "routed");
        assert_eq!(json["route"], "safety_guardian");

        let parsed: StepEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_accessors() {
        let event = StepEvent::RoleCompleted {
            thread_id: "t-9".to_string(),
            role: Role::Drafter,
            revision: 2,
            step: 5,
            summary: "drafted version 2".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.thread_id(), "t-9");
        assert_eq!(event.event_type(), "role_completed");
        assert!(event.describe().starts_with("Drafter:"));
    }

    #[test]
    fn test_budget_pause_described() {
        let event = StepEvent::RunFinished {
            thread_id: "t-1".to_string(),
            status: Status::Running,
            revision: 3,
            step: 24,
            budget_exhausted: true,
            timestamp: Utc::now(),
        };
        assert!(event.describe().contains("step budget"));
    }
}
