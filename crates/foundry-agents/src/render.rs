//! Human-facing rendering of a thread: the full exercise, a short summary,
//! and the next-action hint for terminal statuses.

use coordination::workflow::{Draft, Scores, StateRecord, Status};

const RULE_WIDTH: usize = 72;
/// Scores at or above this are shown as quality indicators.
const HIGHLIGHT_SCORE: f64 = 0.9;
/// Instruction points shown in the summary.
const SUMMARY_POINTS: usize = 5;

/// Full exercise, ready to hand to the person who asked for it.
pub fn presentation(state: &StateRecord) -> Option<String> {
    let draft = state.draft.as_ref()?;
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let mut out = Vec::new();

    out.push(heavy.clone());
    out.push(draft.title.clone());
    out.push(heavy.clone());
    out.push(String::new());

    let indicators = quality_indicators(&state.scores);
    if !indicators.is_empty() {
        out.push("Quality validated".to_string());
        for line in indicators {
            out.push(format!("  {}", line));
        }
        out.push(String::new());
    }

    out.push(light.clone());
    out.push("INSTRUCTIONS".to_string());
    out.push(light.clone());
    out.push(String::new());
    out.push(draft.instructions.trim().to_string());
    out.push(String::new());

    out.push(light.clone());
    out.push("EXERCISE".to_string());
    out.push(light);
    out.push(String::new());
    out.push(draft.content.trim().to_string());
    out.push(String::new());

    out.push(heavy.clone());
    out.push("This exercise supports your mental health; it does not replace it.".to_string());
    out.push("For personalised guidance, talk to a mental health professional.".to_string());
    out.push(heavy);

    Some(out.join("\n"))
}

/// Brief summary: title, key instruction points, scores and review effort.
pub fn summary(state: &StateRecord) -> Option<String> {
    let draft = state.draft.as_ref()?;
    let mut out = vec![draft.title.clone(), String::new()];

    let points = instruction_points(draft, SUMMARY_POINTS);
    if !points.is_empty() {
        out.push("What this exercise helps you do:".to_string());
        for (i, point) in points.iter().enumerate() {
            out.push(format!("  {}. {}", i + 1, point));
        }
        out.push(String::new());
    }

    out.push(format!(
        "Scores: safety {}, empathy {}, clarity {}",
        format_score(state.scores.safety),
        format_score(state.scores.empathy),
        format_score(state.scores.clarity),
    ));
    out.push(format!(
        "Refined through {} revision{}",
        state.revision_count,
        if state.revision_count == 1 { "" } else { "s" }
    ));
    if !state.scratchpad.is_empty() {
        out.push(format!("{} review notes", state.scratchpad.len()));
    }
    if let Some(hint) = next_action(state.status) {
        out.push(String::new());
        out.push(hint.to_string());
    }

    Some(out.join("\n"))
}

/// What the human can do next, for statuses that wait on one.
pub fn next_action(status: Status) -> Option<&'static str> {
    match status {
        Status::WaitingApproval => Some(
            "Approved by the Safety Guardian and Clinical Critic. \
             Reply `approve`, `edit <text>`, or describe what to change.",
        ),
        Status::MaxRevisionsExceeded => Some(
            "Revision limit reached without reviewer agreement. \
             Review the draft, then `edit <text>` or send feedback to try again.",
        ),
        Status::Approved => Some("Approved. Send a message to start another revision."),
        Status::Idle | Status::Running => None,
    }
}

/// First `max` instruction lines with list markers stripped.
pub fn instruction_points(draft: &Draft, max: usize) -> Vec<String> {
    draft
        .instructions
        .lines()
        .map(strip_marker)
        .filter(|line| !line.is_empty())
        .take(max)
        .map(str::to_string)
        .collect()
}

fn strip_marker(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['.', ')', '-', '*', '•'])
        .trim()
}

fn quality_indicators(scores: &Scores) -> Vec<String> {
    [
        ("Safety", scores.safety),
        ("Empathy", scores.empathy),
        ("Clarity", scores.clarity),
    ]
    .into_iter()
    .filter_map(|(name, score)| {
        score
            .filter(|s| *s >= HIGHLIGHT_SCORE)
            .map(|s| format!("{} score: {:.2}", name, s))
    })
    .collect()
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{:.2}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_draft(instructions: &str) -> StateRecord {
        let mut state = StateRecord::new("t-1");
        state.accept_user_message("exam stress");
        state.draft = Some(Draft {
            title: "Worry Time".into(),
            content: "Set aside 15 minutes.".into(),
            instructions: instructions.into(),
        });
        state.revision_count = 2;
        state
    }

    #[test]
    fn test_no_draft_renders_nothing() {
        let state = StateRecord::new("t-1");
        assert!(presentation(&state).is_none());
        assert!(summary(&state).is_none());
    }

    #[test]
    fn test_instruction_points_strip_numbering() {
        let state = state_with_draft("1. Pick a time\n2) Write worries\n\n- Close the notebook\n* Breathe");
        let points = instruction_points(state.draft.as_ref().unwrap(), 5);
        assert_eq!(
            points,
            vec!["Pick a time", "Write worries", "Close the notebook", "Breathe"]
        );
    }

    #[test]
    fn test_summary_limits_points() {
        let instructions = (1..=8)
            .map(|i| format!("{}. step {}", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let state = state_with_draft(&instructions);
        let text = summary(&state).unwrap();
        assert!(text.contains("5. step 5"));
        assert!(!text.contains("step 6"));
        assert!(text.contains("Refined through 2 revisions"));
        assert!(text.contains("safety n/a"));
    }

    #[test]
    fn test_presentation_highlights_high_scores_only() {
        let mut state = state_with_draft("1. one");
        state.scores.safety = Some(0.95);
        state.scores.empathy = Some(0.7);
        let text = presentation(&state).unwrap();
        assert!(text.contains("Safety score: 0.95"));
        assert!(!text.contains("Empathy score"));
        assert!(text.contains("Set aside 15 minutes."));
    }

    #[test]
    fn test_summary_hint_follows_status() {
        let mut state = state_with_draft("1. one");
        state.status = Status::WaitingApproval;
        assert!(summary(&state).unwrap().contains("`approve`"));
        state.status = Status::MaxRevisionsExceeded;
        assert!(summary(&state).unwrap().contains("Revision limit reached"));
        assert!(next_action(Status::Running).is_none());
    }
}
