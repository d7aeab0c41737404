//! State Record: the single aggregate passed between roles for one thread.
//!
//! Every role invocation receives a `&StateRecord` and returns an updated copy.
//! The engine only commits the copy after the role succeeds, so a failed step
//! never leaves a half-applied record behind.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::{Reviewer, Role, Route};

/// Identifier of one independent conversation/workflow instance.
pub type ThreadId = String;

// ── Messages ─────────────────────────────────────────────────────────

/// Who wrote an entry in the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    /// The person driving the thread.
    Human,
    /// One of the four workflow roles.
    Agent(Role),
    /// The engine itself (failures, anomalies).
    System,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Agent(role) => write!(f, "{}", role),
            Self::System => write!(f, "system"),
        }
    }
}

/// One role-tagged entry in the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: Author,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: Author, content: impl Into<String>) -> Self {
        Self {
            author,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

// ── Drafts ───────────────────────────────────────────────────────────

/// The exercise artifact under construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub content: String,
    pub instructions: String,
}

/// A recorded version of the draft. Version numbers start at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftVersion {
    pub version: u32,
    pub draft: Draft,
    pub created_by: Author,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

// ── Critiques and scores ─────────────────────────────────────────────

/// A reviewer's verdict on one specific draft version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub author: Reviewer,
    pub content: String,
    pub approved: bool,
    /// Primary score the reviewer reported, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Draft version this critique was written against.
    pub draft_version: u32,
    pub timestamp: DateTime<Utc>,
}

/// Named quality scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Safety,
    Empathy,
    Clarity,
}

impl ScoreKind {
    /// The only reviewer allowed to write this score.
    pub fn owner(self) -> Reviewer {
        match self {
            Self::Safety => Reviewer::SafetyGuardian,
            Self::Empathy | Self::Clarity => Reviewer::ClinicalCritic,
        }
    }
}

impl fmt::Display for ScoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safety => write!(f, "safety"),
            Self::Empathy => write!(f, "empathy"),
            Self::Clarity => write!(f, "clarity"),
        }
    }
}

/// Error returned when a reviewer tries to write a score it does not own.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("{writer} may not write the {kind} score (owned by {owner})")]
    NotOwner {
        kind: ScoreKind,
        writer: Reviewer,
        owner: Reviewer,
    },
    #[error("{kind} score {value} is not a finite number")]
    NotFinite { kind: ScoreKind, value: f64 },
}

/// Scores in `[0, 1]`; `None` means "not yet evaluated".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub safety: Option<f64>,
    pub empathy: Option<f64>,
    pub clarity: Option<f64>,
}

impl Scores {
    pub fn get(&self, kind: ScoreKind) -> Option<f64> {
        match kind {
            ScoreKind::Safety => self.safety,
            ScoreKind::Empathy => self.empathy,
            ScoreKind::Clarity => self.clarity,
        }
    }

    /// Record a score on behalf of `writer`, clamping into `[0, 1]`.
    pub fn record(&mut self, writer: Reviewer, kind: ScoreKind, value: f64) -> Result<(), ScoreError> {
        let owner = kind.owner();
        if writer != owner {
            return Err(ScoreError::NotOwner {
                kind,
                writer,
                owner,
            });
        }
        if !value.is_finite() {
            return Err(ScoreError::NotFinite { kind, value });
        }
        let value = value.clamp(0.0, 1.0);
        match kind {
            ScoreKind::Safety => self.safety = Some(value),
            ScoreKind::Empathy => self.empathy = Some(value),
            ScoreKind::Clarity => self.clarity = Some(value),
        }
        Ok(())
    }
}

// ── Scratchpad ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotePriority {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for NotePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Free-text note left by a role for observability. Never read by routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNote {
    pub author: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Role>,
    pub content: String,
    pub priority: NotePriority,
    pub timestamp: DateTime<Utc>,
}

impl AgentNote {
    pub fn new(author: Role, priority: NotePriority, content: impl Into<String>) -> Self {
        Self {
            author,
            target: None,
            content: content.into(),
            priority,
            timestamp: Utc::now(),
        }
    }

    pub fn for_role(mut self, target: Role) -> Self {
        self.target = Some(target);
        self
    }
}

// ── Human input ──────────────────────────────────────────────────────

/// Human input waiting to be consumed by the Drafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "text")]
pub enum PendingInput {
    /// A follow-up message asking for changes; revised through the oracle.
    Feedback(String),
    /// Replacement content typed by the human; adopted verbatim.
    Edit(String),
}

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Running,
    /// Both reviewers approved; handed to a human.
    WaitingApproval,
    /// Human approved the draft.
    Approved,
    /// Revision cap hit without reviewer consensus.
    MaxRevisionsExceeded,
}

impl Status {
    /// Whether the automated portion of the workflow has stopped.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::WaitingApproval | Self::Approved | Self::MaxRevisionsExceeded
        )
    }

    /// Legal status transitions:
    /// ```text
    /// Idle → Running
    /// Running → Running | WaitingApproval | MaxRevisionsExceeded
    /// WaitingApproval → Approved | Running
    /// Approved → Running
    /// MaxRevisionsExceeded → Running
    /// ```
    pub fn can_transition(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Running)
                | (Running, WaitingApproval)
                | (Running, MaxRevisionsExceeded)
                | (WaitingApproval, Approved)
                | (WaitingApproval, Running)
                | (Approved, Running)
                | (MaxRevisionsExceeded, Running)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::WaitingApproval => write!(f, "waiting_approval"),
            Self::Approved => write!(f, "approved"),
            Self::MaxRevisionsExceeded => write!(f, "max_revisions_exceeded"),
        }
    }
}

/// Error returned when an illegal status transition is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal status transition: {from} → {to}")]
pub struct IllegalStatusTransition {
    pub from: Status,
    pub to: Status,
}

// ── State Record ─────────────────────────────────────────────────────

/// The shared document for one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub thread_id: ThreadId,
    /// The first user message; what the exercise is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<Draft>,
    pub draft_history: Vec<DraftVersion>,
    pub critiques: Vec<Critique>,
    pub scratchpad: Vec<AgentNote>,
    pub scores: Scores,
    pub revision_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewer: Option<Reviewer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_worker: Option<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input: Option<PendingInput>,
    pub status: Status,
    /// Checkpoint sequence; bumped on every committed mutation.
    pub step: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Create the empty record for a thread seen for the first time.
    pub fn new(thread_id: impl Into<ThreadId>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            request: None,
            messages: Vec::new(),
            draft: None,
            draft_history: Vec::new(),
            critiques: Vec::new(),
            scratchpad: Vec::new(),
            scores: Scores::default(),
            revision_count: 0,
            last_reviewer: None,
            next_worker: None,
            pending_input: None,
            status: Status::Idle,
            step: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Version number of the current draft (0 when there is none).
    pub fn current_version(&self) -> u32 {
        self.revision_count
    }

    /// Append an entry to the audit trail.
    pub fn push_message(&mut self, author: Author, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(author, content));
    }

    /// Move to `to`, enforcing the status transition table.
    pub fn set_status(&mut self, to: Status) -> Result<(), IllegalStatusTransition> {
        if !self.status.can_transition(to) {
            return Err(IllegalStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Record a user message.
    ///
    /// The first message becomes the request. Later messages on a thread that
    /// already has a draft become revision feedback for the Drafter.
    pub fn accept_user_message(&mut self, text: &str) {
        self.push_message(Author::Human, text);
        if self.request.is_none() {
            self.request = Some(text.to_string());
        } else if self.draft.is_some() {
            self.pending_input = Some(PendingInput::Feedback(text.to_string()));
        }
    }

    /// Latest critique by `reviewer` for the given draft version.
    pub fn critique_for(&self, reviewer: Reviewer, version: u32) -> Option<&Critique> {
        self.critiques
            .iter()
            .rev()
            .find(|c| c.author == reviewer && c.draft_version == version)
    }

    /// Most recent critique, regardless of author.
    pub fn latest_critique(&self) -> Option<&Critique> {
        self.critiques.last()
    }

    /// Mark the record as committed: bump the sequence and touch `updated_at`.
    pub fn commit(&mut self) {
        self.step += 1;
        self.updated_at = Utc::now();
    }

    /// Whether `revision_count` agrees with the recorded history.
    pub fn history_consistent(&self) -> bool {
        self.revision_count as usize == self.draft_history.len()
            && match (self.draft.as_ref(), self.draft_history.last()) {
                (None, None) => true,
                (Some(d), Some(v)) => *d == v.draft && v.version == self.revision_count,
                _ => false,
            }
    }

    /// One-line status summary.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] thread={} revision={} critiques={} step={}",
            self.status,
            self.thread_id,
            self.revision_count,
            self.critiques.len(),
            self.step
        )
    }
}
