//! Oracle seam: the external text-completion service behind each role.
//!
//! The core never talks to a model directly. Adapters implement [`Oracle`];
//! the role handlers turn replies into structured fields with the parsers
//! here, so malformed output is caught in one place.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RetryCategory;
use super::role::Role;
use super::state::{Critique, Draft, PendingInput, StateRecord};

/// Raw reply from an oracle call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OracleReply {
    /// Free text as returned by the model.
    pub text: String,
    /// Structured output, when the adapter already extracted it.
    pub fields: Option<Value>,
}

impl OracleReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: None,
        }
    }

    pub fn structured(fields: Value) -> Self {
        Self {
            text: fields.to_string(),
            fields: Some(fields),
        }
    }

    /// Deserialize the structured fields, falling back to JSON in the text.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, OracleError> {
        let value = match &self.fields {
            Some(value) => value.clone(),
            None => {
                let json = extract_json(&self.text).ok_or_else(|| {
                    OracleError::Malformed(format!(
                        "no JSON object in reply: {}",
                        preview(&self.text, 120)
                    ))
                })?;
                serde_json::from_str(json).map_err(|e| OracleError::Malformed(e.to_string()))?
            }
        };
        serde_json::from_value(value).map_err(|e| OracleError::Malformed(e.to_string()))
    }
}

/// Failure of an oracle call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed output: {0}")]
    Malformed(String),
}

impl OracleError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => RetryCategory::Transient,
            Self::RateLimited(_) => RetryCategory::RateLimit,
            Self::Api { status, .. } if *status >= 500 => RetryCategory::Transient,
            Self::Api { .. } => RetryCategory::InvalidRequest,
            Self::Malformed(_) => RetryCategory::ParseFailure,
        }
    }
}

/// `complete(role, state) -> text + optional structured fields`.
///
/// Implementations own their timeouts; a timed-out call must return
/// [`OracleError::Timeout`] rather than hang.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, role: Role, state: &StateRecord) -> Result<OracleReply, OracleError>;
}

pub type SharedOracle = Arc<dyn Oracle>;

// ── Structured outputs ───────────────────────────────────────────────

/// Drafter output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftFields {
    pub title: String,
    pub content: String,
    pub instructions: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DraftFields {
    pub fn into_draft(self) -> (Draft, Option<String>) {
        (
            Draft {
                title: self.title,
                content: self.content,
                instructions: self.instructions,
            },
            self.notes,
        )
    }

    pub fn validate(&self) -> Result<(), OracleError> {
        if self.title.trim().is_empty() || self.content.trim().is_empty() {
            return Err(OracleError::Malformed(
                "draft needs a non-empty title and content".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reviewer output. Safety Guardian reports `score`; Clinical Critic reports
/// `empathyScore` and `clarityScore` (and may report `score` as its primary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFields {
    pub approved: bool,
    #[serde(alias = "feedback")]
    pub critique: String,
    #[serde(default, alias = "safety_score", alias = "safetyScore")]
    pub score: Option<f64>,
    #[serde(default, alias = "empathy_score")]
    pub empathy_score: Option<f64>,
    #[serde(default, alias = "clarity_score")]
    pub clarity_score: Option<f64>,
}

impl ReviewFields {
    pub fn validate(&self) -> Result<(), OracleError> {
        for (name, value) in [
            ("score", self.score),
            ("empathyScore", self.empathy_score),
            ("clarityScore", self.clarity_score),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(OracleError::Malformed(format!("{} is not finite", name)));
                }
            }
        }
        Ok(())
    }
}

// ── Drafter brief ────────────────────────────────────────────────────

/// What the Drafter is being asked to do on this invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DrafterBrief<'a> {
    /// No draft yet: write version 1 from the request.
    Initial { request: &'a str },
    /// A reviewer rejected the current version.
    Revise {
        draft: &'a Draft,
        critique: &'a Critique,
    },
    /// The human asked for changes.
    Feedback { draft: &'a Draft, feedback: &'a str },
    /// The human supplied replacement content.
    Edit { draft: &'a Draft, content: &'a str },
}

impl<'a> DrafterBrief<'a> {
    /// Derive the brief from the record. `None` when there is nothing to
    /// work from: no draft and no request, or a draft with no pending input
    /// and no rejection of the current version.
    pub fn from_state(state: &'a StateRecord) -> Option<Self> {
        let request = state.request.as_deref();
        let Some(draft) = state.draft.as_ref() else {
            return request.map(|request| Self::Initial { request });
        };

        match &state.pending_input {
            Some(PendingInput::Feedback(text)) => {
                return Some(Self::Feedback {
                    draft,
                    feedback: text,
                })
            }
            Some(PendingInput::Edit(text)) => {
                return Some(Self::Edit {
                    draft,
                    content: text,
                })
            }
            None => {}
        }

        let version = state.current_version();
        let rejection = state
            .critiques
            .iter()
            .rev()
            .find(|c| c.draft_version == version && !c.approved);
        rejection.map(|critique| Self::Revise { draft, critique })
    }

    /// Whether this brief needs an oracle call.
    pub fn needs_oracle(&self) -> bool {
        !matches!(self, Self::Edit { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initial { .. } => "initial",
            Self::Revise { .. } => "revise",
            Self::Feedback { .. } => "feedback",
            Self::Edit { .. } => "edit",
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Find the JSON object in a model reply, tolerating code fences and prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&unfenced[start..=end])
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::workflow::role::Reviewer;

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let text = "```json\n{\"approved\": true, \"critique\": \"ok\"}\n```";
        assert_eq!(
            extract_json(text),
            Some("{\"approved\": true, \"critique\": \"ok\"}")
        );
        assert_eq!(extract_json("Sure! {\"a\":1} hope that helps"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_review_from_text() {
        let reply = OracleReply::text(
            "```json\n{\"approved\": false, \"critique\": \"too clinical\", \"empathyScore\": 0.4, \"clarityScore\": 0.8}\n```",
        );
        let review: ReviewFields = reply.parse().unwrap();
        assert!(!review.approved);
        assert_eq!(review.empathy_score, Some(0.4));
        assert_eq!(review.clarity_score, Some(0.8));
        assert_eq!(review.score, None);
    }

    #[test]
    fn test_parse_review_accepts_snake_case() {
        let reply = OracleReply::structured(json!({
            "approved": true,
            "feedback": "fine",
            "safety_score": 0.97
        }));
        let review: ReviewFields = reply.parse().unwrap();
        assert_eq!(review.critique, "fine");
        assert_eq!(review.score, Some(0.97));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let reply = OracleReply::structured(json!({"critique": "no verdict"}));
        let err = reply.parse::<ReviewFields>().unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
        assert_eq!(err.retry_category(), RetryCategory::ParseFailure);
    }

    #[test]
    fn test_empty_draft_is_malformed() {
        let fields = DraftFields {
            title: " ".into(),
            content: "c".into(),
            instructions: "i".into(),
            notes: None,
        };
        assert!(fields.validate().is_err());
    }

    #[test]
    fn test_api_error_classification() {
        let server = OracleError::Api {
            status: 503,
            body: "overloaded".into(),
        };
        let client = OracleError::Api {
            status: 401,
            body: "bad key".into(),
        };
        assert!(server.retry_category().is_retriable());
        assert!(!client.retry_category().is_retriable());
    }

    #[test]
    fn test_drafter_brief_selection() {
        let mut state = StateRecord::new("t-1");
        assert!(DrafterBrief::from_state(&state).is_none());

        state.accept_user_message("exam stress");
        assert_eq!(
            DrafterBrief::from_state(&state),
            Some(DrafterBrief::Initial {
                request: "exam stress"
            })
        );

        state.draft = Some(Draft {
            title: "t".into(),
            content: "c".into(),
            instructions: "i".into(),
        });
        state.revision_count = 1;
        // a draft nobody rejected gives the Drafter nothing to do
        assert!(DrafterBrief::from_state(&state).is_none());

        state.critiques.push(Critique {
            author: Reviewer::SafetyGuardian,
            content: "add a disclaimer".into(),
            approved: false,
            score: Some(0.3),
            draft_version: 1,
            timestamp: Utc::now(),
        });
        let brief = DrafterBrief::from_state(&state).unwrap();
        assert_eq!(brief.kind(), "revise");
        assert!(brief.needs_oracle());

        state.pending_input = Some(PendingInput::Edit("mine".into()));
        let brief = DrafterBrief::from_state(&state).unwrap();
        assert_eq!(brief.kind(), "edit");
        assert!(!brief.needs_oracle());
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdef", 3), "abc…");
    }
}
