//! Workflow integration tests: engine + routing + handlers + checkpoint store
//! with a scripted oracle (no LLM calls).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use coordination::checkpoint::{
    CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, StoreError, StoreResult,
};
use coordination::events::StepEvent;
use coordination::workflow::{
    Author, Decision, GuardrailConfig, GuardrailEngine, Oracle, OracleError, OracleReply,
    Reviewer, Role, StateRecord, Status, ThreadId, WorkflowEngine, WorkflowError,
};

// ── Scripted oracle ────────────────────────────────────────────────

/// Replies queued per role; every call is recorded.
#[derive(Default)]
struct ScriptedOracle {
    replies: Mutex<HashMap<Role, VecDeque<Result<Value, OracleError>>>>,
    calls: Mutex<Vec<Role>>,
}

impl ScriptedOracle {
    fn new() -> Self {
        Self::default()
    }

    fn then(self, role: Role, reply: Result<Value, OracleError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(reply);
        self
    }

    fn draft(self, title: &str) -> Self {
        self.then(Role::Drafter, Ok(draft_fields(title)))
    }

    fn safety(self, approved: bool) -> Self {
        self.then(
            Role::SafetyGuardian,
            Ok(json!({
                "approved": approved,
                "critique": if approved { "no safety concerns" } else { "add a crisis line" },
                "score": if approved { 0.95 } else { 0.3 }
            })),
        )
    }

    fn clinical(self, approved: bool) -> Self {
        self.then(
            Role::ClinicalCritic,
            Ok(json!({
                "approved": approved,
                "critique": if approved { "clinically sound" } else { "steps are vague" },
                "empathyScore": 0.9,
                "clarityScore": if approved { 0.92 } else { 0.5 }
            })),
        )
    }

    fn calls(&self) -> Vec<Role> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, role: Role) -> usize {
        self.calls().iter().filter(|r| **r == role).count()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, role: Role, _state: &StateRecord) -> Result<OracleReply, OracleError> {
        self.calls.lock().unwrap().push(role);
        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(value)) => Ok(OracleReply::structured(value)),
            Some(Err(e)) => Err(e),
            None => Err(OracleError::Transport(format!("no scripted reply for {}", role))),
        }
    }
}

/// Drafts from the request and approves everything.
struct AgreeableOracle;

#[async_trait]
impl Oracle for AgreeableOracle {
    async fn complete(&self, role: Role, state: &StateRecord) -> Result<OracleReply, OracleError> {
        tokio::task::yield_now().await;
        let value = match role {
            Role::Drafter => draft_fields(state.request.as_deref().unwrap_or("untitled")),
            _ => json!({"approved": true, "critique": "fine", "score": 0.9, "empathyScore": 0.9, "clarityScore": 0.9}),
        };
        Ok(OracleReply::structured(value))
    }
}

fn draft_fields(title: &str) -> Value {
    json!({
        "title": title,
        "content": format!("Exercise body for {}", title),
        "instructions": "1. Pause\n2. Notice\n3. Reframe"
    })
}

fn engine_with(oracle: Arc<dyn Oracle>, max_revisions: u32) -> WorkflowEngine {
    WorkflowEngine::new(
        Arc::new(MemoryCheckpointStore::new()),
        oracle,
        GuardrailEngine::new(GuardrailConfig {
            max_revisions,
            step_budget: 24,
        }),
    )
}

// ── Revision cycle ─────────────────────────────────────────────────

#[tokio::test]
async fn test_safety_rejection_then_consensus() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .draft("v1")
            .safety(false)
            .draft("v2")
            .safety(true)
            .clinical(true),
    );
    let engine = engine_with(oracle.clone(), 5);

    let state = engine
        .run_step("t-1", Some("social anxiety at work"))
        .await
        .unwrap();

    assert_eq!(state.status, Status::WaitingApproval);
    assert_eq!(
        oracle.calls(),
        vec![
            Role::Drafter,
            Role::SafetyGuardian,
            Role::Drafter,
            Role::SafetyGuardian,
            Role::ClinicalCritic
        ]
    );
    assert_eq!(state.revision_count, 2);
    assert_eq!(state.draft_history.len(), 2);
    assert!(state.history_consistent());
    assert_eq!(state.draft.as_ref().unwrap().title, "v2");

    let versions: Vec<(Reviewer, u32, bool)> = state
        .critiques
        .iter()
        .map(|c| (c.author, c.draft_version, c.approved))
        .collect();
    assert_eq!(
        versions,
        vec![
            (Reviewer::SafetyGuardian, 1, false),
            (Reviewer::SafetyGuardian, 2, true),
            (Reviewer::ClinicalCritic, 2, true),
        ]
    );
    assert_eq!(state.last_reviewer, Some(Reviewer::ClinicalCritic));
    assert_eq!(state.scores.safety, Some(0.95));
    assert_eq!(state.scores.clarity, Some(0.92));
}

#[tokio::test]
async fn test_clinical_rejection_sends_new_version_back_through_safety() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .draft("v1")
            .safety(true)
            .clinical(false)
            .draft("v2")
            .safety(true)
            .clinical(true),
    );
    let engine = engine_with(oracle.clone(), 5);

    let state = engine.run_step("t-1", Some("insomnia")).await.unwrap();

    assert_eq!(state.status, Status::WaitingApproval);
    assert_eq!(oracle.count(Role::SafetyGuardian), 2);
    assert_eq!(oracle.count(Role::ClinicalCritic), 2);
    assert_eq!(state.revision_count, 2);
    assert!(state
        .scratchpad
        .iter()
        .any(|n| n.author == Role::ClinicalCritic && n.target == Some(Role::Drafter)));
}

#[tokio::test]
async fn test_revision_limit_is_terminal() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .draft("v1")
            .safety(false)
            .draft("v2")
            .safety(false),
    );
    let engine = engine_with(oracle.clone(), 2);

    let state = engine.run_step("t-1", Some("anger")).await.unwrap();

    assert_eq!(state.status, Status::MaxRevisionsExceeded);
    assert_eq!(state.revision_count, 2);
    assert_eq!(oracle.count(Role::Drafter), 2);
    assert!(state.draft.is_some());

    // Nothing further happens without human input.
    let again = engine.run_step("t-1", None).await.unwrap();
    assert_eq!(again.step, state.step);
    assert_eq!(oracle.calls().len(), 4);
}

// ── Human decisions ────────────────────────────────────────────────

#[tokio::test]
async fn test_tiny_step_budget_still_reaches_review() {
    let engine = WorkflowEngine::new(
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(AgreeableOracle),
        GuardrailEngine::new(GuardrailConfig {
            max_revisions: 5,
            step_budget: 1,
        }),
    );

    let mut state = engine.run_step("t-1", Some("exam nerves")).await.unwrap();
    let mut calls = 1;
    while state.status == Status::Running && calls < 10 {
        state = engine.run_step("t-1", None).await.unwrap();
        calls += 1;
    }

    // One Supervisor round per call: draft, safety, clinical, then hand-off.
    assert_eq!(calls, 4);
    assert_eq!(state.status, Status::WaitingApproval);
    assert_eq!(state.revision_count, 1);
    assert!(state.draft.is_some());
}

#[tokio::test]
async fn test_approve_is_idempotent() {
    let oracle = Arc::new(ScriptedOracle::new().draft("v1").safety(true).clinical(true));
    let engine = engine_with(oracle, 5);
    engine.run_step("t-1", Some("worry")).await.unwrap();

    let approved = engine.resolve("t-1", Decision::Approve).await.unwrap();
    assert_eq!(approved.status, Status::Approved);
    assert_eq!(approved.messages.last().unwrap().author, Author::Human);

    let again = engine.resolve("t-1", Decision::Approve).await.unwrap();
    assert_eq!(again, approved);
    assert_eq!(engine.get_state("t-1").await.unwrap().unwrap(), approved);
}

#[tokio::test]
async fn test_human_edit_is_adopted_verbatim_and_rereviewed() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .draft("Worry Time")
            .safety(true)
            .clinical(true)
            .safety(true)
            .clinical(true),
    );
    let engine = engine_with(oracle.clone(), 5);
    engine.run_step("t-1", Some("worry")).await.unwrap();

    let state = engine
        .resolve("t-1", Decision::Edit("Set a 15 minute worry window.".into()))
        .await
        .unwrap();

    assert_eq!(state.status, Status::WaitingApproval);
    assert_eq!(state.revision_count, 2);
    assert_eq!(oracle.count(Role::Drafter), 1);
    let draft = state.draft.as_ref().unwrap();
    assert_eq!(draft.content, "Set a 15 minute worry window.");
    assert_eq!(draft.title, "Worry Time");
    assert_eq!(state.draft_history[1].created_by, Author::Human);
    assert!(state.pending_input.is_none());
    assert_eq!(state.critique_for(Reviewer::SafetyGuardian, 2).map(|c| c.approved), Some(true));
}

#[tokio::test]
async fn test_feedback_reopens_approved_thread() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .draft("long")
            .safety(true)
            .clinical(true)
            .draft("short")
            .safety(true)
            .clinical(true),
    );
    let engine = engine_with(oracle.clone(), 5);
    engine.run_step("t-1", Some("grounding")).await.unwrap();
    engine.resolve("t-1", Decision::Approve).await.unwrap();

    let state = engine
        .run_step("t-1", Some("make it shorter"))
        .await
        .unwrap();

    assert_eq!(state.status, Status::WaitingApproval);
    assert_eq!(state.draft.as_ref().unwrap().title, "short");
    assert_eq!(state.revision_count, 2);
    assert_eq!(state.request.as_deref(), Some("grounding"));
    assert_eq!(oracle.count(Role::Drafter), 2);
}

#[tokio::test]
async fn test_invalid_decisions() {
    let engine = engine_with(Arc::new(ScriptedOracle::new()), 5);

    let err = engine.resolve("nope", Decision::Approve).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ThreadNotFound(_)));

    // Drafter fails, leaving a running thread with no draft.
    let _ = engine.run_step("t-1", Some("x")).await.unwrap_err();
    let err = engine
        .resolve("t-1", Decision::Edit("text".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidDecision { .. }));
    assert!(!err.is_retriable());
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_oracle_failure_leaves_last_commit_and_resumes() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .draft("v1")
            .then(Role::SafetyGuardian, Err(OracleError::Timeout { secs: 30 }))
            .safety(true)
            .clinical(true),
    );
    let engine = engine_with(oracle.clone(), 5);

    let err = engine.run_step("t-1", Some("panic")).await.unwrap_err();
    assert!(err.is_oracle_failure());
    assert!(err.is_retriable());

    let snapshot = err.snapshot().unwrap().clone();
    assert_eq!(snapshot.revision_count, 1);
    assert!(snapshot.critiques.is_empty());
    assert_eq!(snapshot.status, Status::Running);
    let last = snapshot.messages.last().unwrap();
    assert_eq!(last.author, Author::System);
    assert!(last.content.contains("Safety Guardian failed"));

    let stored = engine.get_state("t-1").await.unwrap().unwrap();
    assert_eq!(stored, snapshot);

    let resumed = engine.run_step("t-1", None).await.unwrap();
    assert_eq!(resumed.status, Status::WaitingApproval);
    assert_eq!(resumed.revision_count, 1);
    assert_eq!(oracle.count(Role::Drafter), 1);
}

#[tokio::test]
async fn test_malformed_reviewer_output_is_parse_failure() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .draft("v1")
            .then(Role::SafetyGuardian, Ok(json!({"critique": "no verdict"}))),
    );
    let engine = engine_with(oracle, 5);

    let err = engine.run_step("t-1", Some("panic")).await.unwrap_err();
    assert_eq!(
        err.retry_category(),
        coordination::workflow::RetryCategory::ParseFailure
    );
    assert!(err.snapshot().unwrap().critiques.is_empty());
}

/// Memory store whose writes start failing after `ok_puts` successes.
struct FlakyStore {
    inner: MemoryCheckpointStore,
    ok_puts: AtomicUsize,
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn get(&self, thread_id: &str) -> StoreResult<Option<StateRecord>> {
        self.inner.get(thread_id).await
    }

    async fn put(&self, thread_id: &str, state: &StateRecord) -> StoreResult<()> {
        let remaining = self.ok_puts.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(StoreError::Io {
                path: PathBuf::from("/checkpoints"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.ok_puts.store(remaining - 1, Ordering::SeqCst);
        self.inner.put(thread_id, state).await
    }

    async fn list_threads(&self) -> StoreResult<Vec<ThreadId>> {
        self.inner.list_threads().await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn test_persistence_failure_halts_run() {
    let store = Arc::new(FlakyStore {
        inner: MemoryCheckpointStore::new(),
        ok_puts: AtomicUsize::new(2),
    });
    let oracle = Arc::new(ScriptedOracle::new().draft("v1").safety(true).clinical(true));
    let engine = WorkflowEngine::new(store.clone(), oracle.clone(), GuardrailEngine::default());

    // Writes: accepted message, supervisor, then the drafter step fails.
    let err = engine.run_step("t-1", Some("x")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Persistence { .. }));
    assert!(!err.is_retriable());
    assert_eq!(oracle.calls(), vec![Role::Drafter]);

    let stored = store.inner.get("t-1").await.unwrap().unwrap();
    assert!(stored.draft.is_none());
}

// ── Persistence, concurrency, events ───────────────────────────────

#[tokio::test]
async fn test_file_store_round_trip_across_engines() {
    let dir = tempfile::tempdir().unwrap();

    let first = WorkflowEngine::new(
        Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap()),
        Arc::new(AgreeableOracle),
        GuardrailEngine::default(),
    );
    let state = first.run_step("thread/with spaces", Some("breathing")).await.unwrap();
    assert_eq!(state.status, Status::WaitingApproval);
    drop(first);

    let second = WorkflowEngine::new(
        Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap()),
        Arc::new(ScriptedOracle::new()),
        GuardrailEngine::default(),
    );
    assert_eq!(
        second.list_threads().await.unwrap(),
        vec!["thread/with spaces".to_string()]
    );
    assert_eq!(
        second.get_state("thread/with spaces").await.unwrap(),
        Some(state)
    );
    let approved = second
        .resolve("thread/with spaces", Decision::Approve)
        .await
        .unwrap();
    assert_eq!(approved.status, Status::Approved);
}

#[tokio::test]
async fn test_threads_run_concurrently_and_stay_isolated() {
    let engine = Arc::new(engine_with(Arc::new(AgreeableOracle), 5));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .run_step(&format!("t-{}", i), Some(&format!("request {}", i)))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let state = handle.await.unwrap().unwrap();
        assert_eq!(state.thread_id, format!("t-{}", i));
        assert_eq!(state.status, Status::WaitingApproval);
        assert_eq!(
            state.draft.as_ref().unwrap().title,
            format!("request {}", i)
        );
        assert_eq!(state.revision_count, 1);
    }
    assert_eq!(engine.list_threads().await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_same_thread_calls_are_serialised() {
    let engine = Arc::new(engine_with(Arc::new(AgreeableOracle), 5));
    engine.run_step("t-1", Some("sleep")).await.unwrap();

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_step("t-1", Some("shorter")).await })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_step("t-1", Some("warmer")).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let state = engine.get_state("t-1").await.unwrap().unwrap();
    assert_eq!(state.revision_count, 3);
    assert!(state.history_consistent());
    assert_eq!(state.status, Status::WaitingApproval);
}

#[tokio::test]
async fn test_step_events_trace_the_run() {
    let engine = engine_with(Arc::new(AgreeableOracle), 5);
    let mut rx = engine.subscribe();

    engine.run_step("t-1", Some("stress")).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(StepEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(StepEvent::RunFinished {
            status: Status::WaitingApproval,
            budget_exhausted: false,
            ..
        })
    ));
    let completed: Vec<Role> = events
        .iter()
        .filter_map(|e| match e {
            StepEvent::RoleCompleted { role, .. } => Some(*role),
            _ => None,
        })
        .collect();
    assert_eq!(
        completed,
        vec![Role::Drafter, Role::SafetyGuardian, Role::ClinicalCritic]
    );
    assert!(events.iter().all(|e| e.thread_id() == "t-1"));
}
