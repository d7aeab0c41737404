//! System preambles and per-invocation user prompts for each role.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes
//! so telemetry and logs show which prompts produced a given draft.

use coordination::workflow::{
    AgentNote, Critique, Draft, DrafterBrief, Reviewer, Role, StateRecord,
};

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Scratchpad notes included in a prompt, newest last.
const MAX_NOTES: usize = 6;

pub const DRAFTER_PREAMBLE: &str = "\
You are the Drafter in a clinical content team that writes Cognitive Behavioral \
Therapy (CBT) exercises for self-guided use.

## Your job
Write one complete, practical exercise for the request you are given. The exercise \
must be something a person can do alone in 10-30 minutes: a thought record, a \
behavioural experiment, a graded exposure ladder, a grounding or reframing practice.

## Requirements
- Warm, plain language. No jargon without a one-line explanation.
- Concrete numbered steps in `instructions`, one step per line.
- The full exercise body in `content` as markdown: purpose, steps with worked \
  examples, reflection questions.
- Never diagnose, never promise outcomes, never suggest stopping medication.
- Include a short note that the exercise does not replace professional care, and \
  point to emergency services or a crisis line if the person feels unsafe.

## Revisions
When you receive reviewer critiques or human feedback, address every point. Keep \
what already works; do not rewrite unrelated sections.

## Output
Reply with a single JSON object and nothing else:
{\"title\": string, \"content\": string, \"instructions\": string, \"notes\": string}
`notes` is a one-line summary of what changed in this version.";

pub const SAFETY_GUARDIAN_PREAMBLE: &str = "\
You are the Safety Guardian. You review CBT exercise drafts before anyone sees them.

## Reject the draft if it
- could encourage self-harm, disordered eating, substance misuse or isolation;
- gives medical, medication or diagnostic advice;
- uses exposure steps without pacing, consent or a way to stop;
- lacks a clear pointer to professional help or crisis resources;
- contains anything shaming, coercive or unsafe for a vulnerable reader.

## Scoring
`score` is your safety rating from 0.0 (unsafe) to 1.0 (no concerns). Approve only \
when the score is at least 0.8 and nothing above applies.

## Output
Reply with a single JSON object and nothing else:
{\"approved\": bool, \"critique\": string, \"score\": number}
When rejecting, `critique` must list each concrete change the Drafter has to make.";

pub const CLINICAL_CRITIC_PREAMBLE: &str = "\
You are the Clinical Critic, an experienced CBT practitioner. The draft you see has \
already passed a safety review; you judge clinical quality.

## Check
- The exercise uses a recognised CBT technique correctly.
- Steps are in a sensible order and each one is actionable.
- The tone is empathetic and non-judgemental.
- The reader knows what to do, for how long, and what to notice afterwards.

## Scoring
`empathyScore` and `clarityScore` run from 0.0 to 1.0. Approve only when both are \
at least 0.8.

## Output
Reply with a single JSON object and nothing else:
{\"approved\": bool, \"critique\": string, \"empathyScore\": number, \"clarityScore\": number}
When rejecting, `critique` must say exactly what to change.";

/// System and user message for one oracle call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: &'static str,
    pub user: String,
}

/// Build the prompt for `role` from the record. `None` for the Supervisor,
/// and for a Drafter with nothing to work from.
pub fn build(role: Role, state: &StateRecord) -> Option<Prompt> {
    match role {
        Role::Drafter => {
            let brief = DrafterBrief::from_state(state)?;
            Some(Prompt {
                system: DRAFTER_PREAMBLE,
                user: drafter_prompt(&brief, &notes_for(role, state)),
            })
        }
        Role::SafetyGuardian => reviewer_prompt(Reviewer::SafetyGuardian, state).map(|user| {
            Prompt {
                system: SAFETY_GUARDIAN_PREAMBLE,
                user,
            }
        }),
        Role::ClinicalCritic => reviewer_prompt(Reviewer::ClinicalCritic, state).map(|user| {
            Prompt {
                system: CLINICAL_CRITIC_PREAMBLE,
                user,
            }
        }),
        Role::Supervisor => None,
    }
}

pub fn drafter_prompt(brief: &DrafterBrief<'_>, notes: &[&AgentNote]) -> String {
    let mut out = String::new();
    match brief {
        DrafterBrief::Initial { request } => {
            out.push_str("Write a new CBT exercise for this request:\n\n");
            out.push_str(request);
            out.push('\n');
        }
        DrafterBrief::Revise { draft, critique } => {
            out.push_str(&format!(
                "The {} rejected version {}. Revise it.\n\n",
                critique.author.role().label(),
                critique.draft_version
            ));
            push_critique(&mut out, critique);
            push_draft(&mut out, draft);
        }
        DrafterBrief::Feedback { draft, feedback } => {
            out.push_str("The person reviewing the exercise asked for changes:\n\n");
            out.push_str(feedback);
            out.push_str("\n\n");
            push_draft(&mut out, draft);
        }
        DrafterBrief::Edit { draft, content } => {
            // Edits bypass the oracle; kept so logs can show the full brief.
            out.push_str("Adopt this edited content verbatim:\n\n");
            out.push_str(content);
            out.push_str("\n\n");
            push_draft(&mut out, draft);
        }
    }
    push_notes(&mut out, notes);
    out
}

/// `None` when the thread has no draft to review.
pub fn reviewer_prompt(reviewer: Reviewer, state: &StateRecord) -> Option<String> {
    let draft = state.draft.as_ref()?;
    let version = state.current_version();
    let mut out = format!("Review version {} of the exercise.\n\n", version);

    if let Some(request) = state.request.as_deref() {
        out.push_str("## Original request\n");
        out.push_str(request);
        out.push_str("\n\n");
    }
    push_draft(&mut out, draft);

    let earlier: Vec<&Critique> = state
        .critiques
        .iter()
        .filter(|c| c.author == reviewer && c.draft_version < version)
        .collect();
    if let Some(last) = earlier.last() {
        out.push_str(&format!(
            "## Your previous critique (version {})\n{}\n\n",
            last.draft_version, last.content
        ));
    }

    push_notes(&mut out, &notes_for(reviewer.role(), state));
    Some(out)
}

/// Scratchpad notes addressed to `role` or to everyone.
fn notes_for(role: Role, state: &StateRecord) -> Vec<&AgentNote> {
    let notes: Vec<&AgentNote> = state
        .scratchpad
        .iter()
        .filter(|n| n.author != role && n.target.map_or(true, |t| t == role))
        .collect();
    let skip = notes.len().saturating_sub(MAX_NOTES);
    notes.into_iter().skip(skip).collect()
}

fn push_draft(out: &mut String, draft: &Draft) {
    out.push_str("## Current draft\n");
    out.push_str(&format!("Title: {}\n\n", draft.title));
    out.push_str("### Instructions\n");
    out.push_str(&draft.instructions);
    out.push_str("\n\n### Content\n");
    out.push_str(&draft.content);
    out.push_str("\n\n");
}

fn push_critique(out: &mut String, critique: &Critique) {
    out.push_str("## Critique\n");
    out.push_str(&critique.content);
    if let Some(score) = critique.score {
        out.push_str(&format!("\n(score {:.2})", score));
    }
    out.push_str("\n\n");
}

fn push_notes(out: &mut String, notes: &[&AgentNote]) {
    if notes.is_empty() {
        return;
    }
    out.push_str("## Team notes\n");
    for note in notes {
        out.push_str(&format!(
            "- [{}] {}: {}\n",
            note.priority,
            note.author.label(),
            note.content
        ));
    }
}
