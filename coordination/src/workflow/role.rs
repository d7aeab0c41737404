//! Closed role and route enums.
//!
//! Routing never goes through strings: the Supervisor emits a [`Route`], and
//! the engine maps each worker route to its handler with an exhaustive match.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four workflow roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Drafter,
    SafetyGuardian,
    ClinicalCritic,
    Supervisor,
}

impl Role {
    pub fn all() -> &'static [Role] {
        &[
            Role::Drafter,
            Role::SafetyGuardian,
            Role::ClinicalCritic,
            Role::Supervisor,
        ]
    }

    /// Human-readable label for progress output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Drafter => "Drafter",
            Self::SafetyGuardian => "Safety Guardian",
            Self::ClinicalCritic => "Clinical Critic",
            Self::Supervisor => "Supervisor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drafter => write!(f, "drafter"),
            Self::SafetyGuardian => write!(f, "safety_guardian"),
            Self::ClinicalCritic => write!(f, "clinical_critic"),
            Self::Supervisor => write!(f, "supervisor"),
        }
    }
}

/// The two reviewer roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reviewer {
    SafetyGuardian,
    ClinicalCritic,
}

impl Reviewer {
    pub fn role(self) -> Role {
        match self {
            Self::SafetyGuardian => Role::SafetyGuardian,
            Self::ClinicalCritic => Role::ClinicalCritic,
        }
    }
}

impl From<Reviewer> for Role {
    fn from(reviewer: Reviewer) -> Self {
        reviewer.role()
    }
}

impl fmt::Display for Reviewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role())
    }
}

/// Routing hint written by the Supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Drafter,
    SafetyGuardian,
    ClinicalCritic,
    /// Both reviewers approved the current version; hand off to a human.
    HumanReview,
    /// A rejection arrived with no revisions left.
    RevisionLimit,
}

impl Route {
    /// The role this route dispatches to, or `None` for terminal routes.
    pub fn worker(self) -> Option<Role> {
        match self {
            Self::Drafter => Some(Role::Drafter),
            Self::SafetyGuardian => Some(Role::SafetyGuardian),
            Self::ClinicalCritic => Some(Role::ClinicalCritic),
            Self::HumanReview | Self::RevisionLimit => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.worker().is_none()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drafter => write!(f, "drafter"),
            Self::SafetyGuardian => write!(f, "safety_guardian"),
            Self::ClinicalCritic => write!(f, "clinical_critic"),
            Self::HumanReview => write!(f, "human_review"),
            Self::RevisionLimit => write!(f, "revision_limit"),
        }
    }
}
