//! Workflow error taxonomy with retry classification.
//!
//! Callers can ask `retry_category()` / `is_retriable()` instead of matching
//! on message strings.
//!
//! | Category        | Retriable | Source                                  |
//! |-----------------|-----------|-----------------------------------------|
//! | Transient       | yes       | oracle transport error or timeout        |
//! | RateLimit       | yes       | oracle throttled the request             |
//! | ParseFailure    | yes       | oracle output failed structured parsing  |
//! | Persistence     | no        | checkpoint store unavailable or corrupt  |
//! | InvalidRequest  | no        | bad caller input (unknown thread, ...)   |
//! | PolicyViolation | no        | illegal status transition, bad state     |

use std::fmt;

use thiserror::Error;

use super::oracle::OracleError;
use super::role::Role;
use super::state::{IllegalStatusTransition, StateRecord, Status};
use crate::checkpoint::StoreError;

/// Classification used by hosts to decide whether to retry a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    Transient,
    RateLimit,
    ParseFailure,
    Persistence,
    InvalidRequest,
    PolicyViolation,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit | Self::ParseFailure)
    }

    /// Suggested max retry attempts for retriable categories.
    pub fn default_max_retries(self) -> Option<u32> {
        match self {
            Self::Transient => Some(3),
            Self::RateLimit => Some(5),
            Self::ParseFailure => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::ParseFailure => write!(f, "parse_failure"),
            Self::Persistence => write!(f, "persistence"),
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::PolicyViolation => write!(f, "policy_violation"),
        }
    }
}

/// Failure of a single role invocation. Nothing is committed for the step.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("{role} oracle call failed: {source}")]
    Oracle {
        role: Role,
        #[source]
        source: OracleError,
    },

    #[error("{role} requires a draft but the thread has none")]
    MissingDraft { role: Role },

    #[error("{role} requires a request but the thread has none")]
    MissingRequest { role: Role },

    #[error("{role} has no feedback, edit or rejection to act on")]
    NothingToRevise { role: Role },

    #[error(transparent)]
    IllegalStatus(#[from] IllegalStatusTransition),
}

impl RoleError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Oracle { source, .. } => source.retry_category(),
            Self::MissingDraft { .. }
            | Self::MissingRequest { .. }
            | Self::NothingToRevise { .. } => {
                RetryCategory::PolicyViolation
            }
            Self::IllegalStatus(_) => RetryCategory::PolicyViolation,
        }
    }
}

/// Errors surfaced by [`WorkflowEngine`](super::engine::WorkflowEngine).
///
/// Step failures carry a snapshot: the last committed record with a system
/// message describing the failure appended.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("thread '{thread_id}': {role} step failed: {source}")]
    Role {
        thread_id: String,
        role: Role,
        #[source]
        source: RoleError,
        snapshot: Box<StateRecord>,
    },

    #[error("thread '{thread_id}': checkpoint store failure (state may be stale): {source}")]
    Persistence {
        thread_id: String,
        #[source]
        source: StoreError,
        snapshot: Option<Box<StateRecord>>,
    },

    #[error("thread '{0}' not found")]
    ThreadNotFound(String),

    #[error("a new thread needs a non-empty request message")]
    EmptyRequest,

    #[error("thread '{thread_id}' is {status}: {reason}")]
    InvalidDecision {
        thread_id: String,
        status: Status,
        reason: String,
    },

    #[error(transparent)]
    IllegalStatus(#[from] IllegalStatusTransition),
}

impl WorkflowError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Role { source, .. } => source.retry_category(),
            Self::Persistence { .. } => RetryCategory::Persistence,
            Self::ThreadNotFound(_) | Self::EmptyRequest | Self::InvalidDecision { .. } => {
                RetryCategory::InvalidRequest
            }
            Self::IllegalStatus(_) => RetryCategory::PolicyViolation,
        }
    }

    /// Whether the host may retry the whole step.
    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    /// The record the caller should treat as current after this failure.
    pub fn snapshot(&self) -> Option<&StateRecord> {
        match self {
            Self::Role { snapshot, .. } => Some(snapshot.as_ref()),
            Self::Persistence { snapshot, .. } => snapshot.as_deref(),
            _ => None,
        }
    }

    /// Whether this is an oracle failure (transport, timeout, malformed output).
    pub fn is_oracle_failure(&self) -> bool {
        matches!(
            self,
            Self::Role {
                source: RoleError::Oracle { .. },
                ..
            }
        )
    }
}
