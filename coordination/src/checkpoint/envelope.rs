//! Checkpoint envelope and integrity validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{StoreError, StoreResult};
use crate::workflow::state::{StateRecord, Status, ThreadId};

/// A persisted State Record plus the metadata needed to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub thread_id: ThreadId,
    /// Mirrors `state.step` at save time.
    pub sequence: u64,
    pub saved_at: DateTime<Utc>,
    pub state: StateRecord,
}

impl Checkpoint {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(state: &StateRecord) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            thread_id: state.thread_id.clone(),
            sequence: state.step,
            saved_at: Utc::now(),
            state: state.clone(),
        }
    }

    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Deserialize, rejecting envelopes written by a newer schema.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let checkpoint: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Deserialization(e.to_string()))?;

        if checkpoint.version > Self::CURRENT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: checkpoint.version,
            });
        }

        Ok(checkpoint)
    }

    /// Check the envelope and its record for internal consistency.
    pub fn validate(&self) -> IntegrityStatus {
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let state = &self.state;

        if self.thread_id != state.thread_id {
            errors.push(format!(
                "envelope thread '{}' holds record for '{}'",
                self.thread_id, state.thread_id
            ));
        }

        if self.sequence != state.step {
            errors.push(format!(
                "envelope sequence {} != record step {}",
                self.sequence, state.step
            ));
        }

        if state.revision_count as usize != state.draft_history.len() {
            errors.push(format!(
                "revision_count {} != draft_history length {}",
                state.revision_count,
                state.draft_history.len()
            ));
        }

        for (idx, entry) in state.draft_history.iter().enumerate() {
            if entry.version as usize != idx + 1 {
                errors.push(format!(
                    "draft_history[{}] has version {}, expected {}",
                    idx,
                    entry.version,
                    idx + 1
                ));
            }
        }

        match (state.draft.as_ref(), state.draft_history.last()) {
            (Some(draft), Some(latest)) if *draft != latest.draft => {
                errors.push("current draft differs from latest history entry".to_string());
            }
            (Some(_), None) => errors.push("draft present with empty history".to_string()),
            (None, Some(_)) => errors.push("history present with no current draft".to_string()),
            _ => {}
        }

        if matches!(state.status, Status::WaitingApproval | Status::Approved)
            && state.draft.is_none()
        {
            errors.push(format!("status {} without a draft", state.status));
        }

        // Routing self-heals the rest; surface them so operators see drift.
        for critique in &state.critiques {
            if critique.draft_version == 0 || critique.draft_version > state.revision_count {
                warnings.push(format!(
                    "{} critique references missing draft version {}",
                    critique.author, critique.draft_version
                ));
            }
        }

        if let Some(last) = state.critiques.last() {
            if state.last_reviewer != Some(last.author) {
                warnings.push(format!(
                    "last_reviewer {:?} does not match latest critique author {}",
                    state.last_reviewer, last.author
                ));
            }
        }

        if state.pending_input.is_some() && state.draft.is_none() {
            warnings.push("pending human input on a thread with no draft".to_string());
        }

        if !errors.is_empty() {
            IntegrityStatus::Corrupted { errors }
        } else if !warnings.is_empty() {
            IntegrityStatus::Recoverable { warnings }
        } else {
            IntegrityStatus::Valid
        }
    }

    /// Parse and validate, returning the record if it can be used.
    pub fn restore(json: &str) -> StoreResult<StateRecord> {
        let checkpoint = Self::from_json(json)?;
        match checkpoint.validate() {
            IntegrityStatus::Valid => Ok(checkpoint.state),
            IntegrityStatus::Recoverable { warnings } => {
                warn!(
                    thread_id = %checkpoint.thread_id,
                    warnings = ?warnings,
                    "Checkpoint loaded with warnings"
                );
                Ok(checkpoint.state)
            }
            IntegrityStatus::Corrupted { errors } => Err(StoreError::Integrity {
                thread_id: checkpoint.thread_id,
                reason: errors.join("; "),
            }),
        }
    }
}

/// Integrity check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Valid,
    /// Minor inconsistencies the engine can heal.
    Recoverable { warnings: Vec<String> },
    /// The record cannot be used.
    Corrupted { errors: Vec<String> },
}

impl IntegrityStatus {
    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Valid | Self::Recoverable { .. })
    }
}
