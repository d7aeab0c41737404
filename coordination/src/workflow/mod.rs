//! Drafting Workflow: Drafter and reviewer revision cycle
//!
//! A Supervisor routes a shared [`StateRecord`] between three worker roles
//! until both reviewers approve the same draft version, then hands off to a
//! human.
//!
//! # Revision Cycle
//!
//! ```text
//! Supervisor → Drafter → Supervisor → SafetyGuardian → Supervisor
//!     ▲                                   │ reject          │ approve
//!     │◀──────── Drafter ◀────────────────┘                 ▼
//!     │                                              ClinicalCritic
//!     │◀──────── Drafter ◀─────── reject ───────────────────┤
//!     │                                                     │ approve
//!     │                                                     ▼
//!     │                                              waitingApproval
//!     │                                                     │
//!     └──────────── edit / feedback ◀── human ──────────────┤
//!                                                           ▼ approve
//!                                                        approved
//! ```
//!
//! A rejection once `max_revisions` versions exist ends in
//! `maxRevisionsExceeded` instead of another Drafter call.

pub mod engine;
pub mod error;
pub mod guardrails;
pub mod handlers;
pub mod oracle;
pub mod role;
pub mod routing;
pub mod state;

pub use engine::{Decision, RunReport, WorkflowEngine};
pub use error::{RetryCategory, RoleError, WorkflowError};
pub use guardrails::{GuardrailConfig, GuardrailEngine, GuardrailOutcome, STEPS_PER_ROUND};
pub use handlers::{RoleHandler, RoleOutcome, Roster};
pub use oracle::{
    DraftFields, DrafterBrief, Oracle, OracleError, OracleReply, ReviewFields, SharedOracle,
};
pub use role::{Reviewer, Role, Route};
pub use routing::{route, Phase, RouteDecision};
pub use state::{
    AgentNote, Author, ChatMessage, Critique, Draft, DraftVersion, IllegalStatusTransition,
    NotePriority, PendingInput, ScoreError, ScoreKind, Scores, StateRecord, Status, ThreadId,
};
