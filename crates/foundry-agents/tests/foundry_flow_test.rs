//! End-to-end flow through the host layer with canned chat-completion
//! payloads standing in for the model server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coordination::checkpoint::{FileCheckpointStore, MemoryCheckpointStore};
use coordination::workflow::{
    Decision, Oracle, OracleError, OracleReply, Role, StateRecord, Status,
};
use foundry_agents::config::FoundryConfig;
use foundry_agents::mcp::{FoundryServer, ResolveRequest, RunRequest, StateRequest};
use foundry_agents::oracle::parse_completion;
use foundry_agents::telemetry::TelemetryReader;
use foundry_agents::{prompts, render, Foundry};
use rmcp::handler::server::wrapper::Parameters;
use serde_json::json;

/// Replays chat-completion response bodies in order and records which role
/// asked, after checking a prompt can be built for it.
struct CannedCompletions {
    bodies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Role>>,
}

impl CannedCompletions {
    fn new(replies: Vec<serde_json::Value>) -> Arc<Self> {
        let bodies = replies
            .into_iter()
            .map(|content| {
                json!({
                    "id": "chatcmpl-test",
                    "object": "chat.completion",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": format!("```json\n{}\n```", content)},
                        "finish_reason": "stop"
                    }]
                })
                .to_string()
            })
            .collect();
        Arc::new(Self {
            bodies: Mutex::new(bodies),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Role> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for CannedCompletions {
    async fn complete(&self, role: Role, state: &StateRecord) -> Result<OracleReply, OracleError> {
        assert!(
            prompts::build(role, state).is_some(),
            "no prompt for {role} at step {}",
            state.step
        );
        self.calls.lock().unwrap().push(role);
        let body = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OracleError::Transport("script exhausted".into()))?;
        parse_completion(&body).map(OracleReply::text)
    }
}

fn draft(title: &str) -> serde_json::Value {
    json!({
        "title": title,
        "content": "## Purpose\nNotice anxious thoughts.\n\nIf you feel unsafe, call your local crisis line.",
        "instructions": "1. Sit somewhere quiet\n2. Write the thought\n3. Rate it 0-100",
        "notes": "first pass"
    })
}

fn safety(approved: bool, score: f64) -> serde_json::Value {
    json!({"approved": approved, "critique": if approved { "safe" } else { "add a crisis line" }, "score": score})
}

fn clinical(approved: bool) -> serde_json::Value {
    json!({"approved": approved, "critique": "warm and clear", "empathyScore": 0.93, "clarityScore": 0.91})
}

fn memory_foundry(oracle: Arc<CannedCompletions>, config: FoundryConfig) -> Foundry {
    Foundry::with_parts(config, Arc::new(MemoryCheckpointStore::new()), oracle)
}

#[tokio::test]
async fn test_run_then_approve_with_telemetry() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = dir.path().join("runs.jsonl");
    let mut config = FoundryConfig::default();
    config.telemetry_path = Some(telemetry.clone());

    let oracle = CannedCompletions::new(vec![
        draft("Thought Record"),
        safety(false, 0.4),
        draft("Thought Record v2"),
        safety(true, 0.96),
        clinical(true),
    ]);
    let foundry = memory_foundry(oracle.clone(), config);

    let report = foundry
        .run("t-1", Some("I panic before exams"))
        .await
        .unwrap();
    assert_eq!(report.state.status, Status::WaitingApproval);
    assert_eq!(report.state.revision_count, 2);
    assert_eq!(report.oracle_calls, 5);
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

    let summary = render::summary(&report.state).unwrap();
    assert!(summary.starts_with("Thought Record v2"));
    assert!(summary.contains("1. Sit somewhere quiet"));
    assert!(summary.contains("safety 0.96"));

    let approved = foundry.resolve("t-1", Decision::Approve).await.unwrap();
    assert_eq!(approved.state.status, Status::Approved);
    assert_eq!(approved.oracle_calls, 0);

    let reader = TelemetryReader::read_from_file(&telemetry).unwrap();
    let triggers: Vec<&str> = reader.runs().iter().map(|r| r.trigger.as_str()).collect();
    assert_eq!(triggers, vec!["run", "resolve:approve"]);
    assert_eq!(reader.summary().approved, 1);
}

#[tokio::test]
async fn test_malformed_completion_is_retriable_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = dir.path().join("runs.jsonl");
    let mut config = FoundryConfig::default();
    config.telemetry_path = Some(telemetry.clone());

    let oracle = CannedCompletions::new(vec![json!({"title": "missing content"})]);
    let foundry = memory_foundry(oracle, config);

    let err = foundry.run("t-1", Some("help me sleep")).await.unwrap_err();
    assert!(err.is_oracle_failure());
    assert!(err.is_retriable());

    let snapshot = err.snapshot().unwrap();
    assert!(snapshot.draft.is_none());
    assert_eq!(snapshot.revision_count, 0);

    let reader = TelemetryReader::read_from_file(&telemetry).unwrap();
    assert_eq!(reader.summary().failures, 1);
    assert_eq!(
        reader.runs()[0].retry_category.as_deref(),
        Some("parse_failure")
    );
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = FoundryConfig::default();

    {
        let oracle = CannedCompletions::new(vec![
            draft("Grounding"),
            safety(true, 0.9),
            clinical(true),
        ]);
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        let foundry = Foundry::with_parts(config.clone(), Arc::new(store), oracle);
        let report = foundry.run("persist", Some("grounding")).await.unwrap();
        assert_eq!(report.state.status, Status::WaitingApproval);
    }

    let oracle = CannedCompletions::new(vec![]);
    let store = FileCheckpointStore::open(dir.path()).await.unwrap();
    let foundry = Foundry::with_parts(config, Arc::new(store), oracle.clone());

    assert_eq!(foundry.threads().await.unwrap(), vec!["persist".to_string()]);
    let state = foundry.state("persist").await.unwrap().unwrap();
    assert_eq!(state.status, Status::WaitingApproval);
    assert_eq!(state.draft.as_ref().unwrap().title, "Grounding");

    let report = foundry.resolve("persist", Decision::Approve).await.unwrap();
    assert_eq!(report.state.status, Status::Approved);
    assert!(oracle.calls().is_empty());
}

#[tokio::test]
async fn test_mcp_tools_drive_the_workflow() {
    let oracle = CannedCompletions::new(vec![
        draft("Breathing Ladder"),
        safety(true, 0.95),
        clinical(true),
        // after the human edit both reviewers look again
        safety(true, 0.97),
        clinical(true),
    ]);
    let server = FoundryServer::new(Arc::new(memory_foundry(
        oracle.clone(),
        FoundryConfig::default(),
    )));

    let out = server
        .foundry_run(Parameters(RunRequest {
            thread_id: Some("mcp-1".into()),
            message: Some("breathing exercise for panic".into()),
        }))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["status"], "waiting_approval");
    assert_eq!(value["revision"], 1);

    let state = server
        .foundry_state(Parameters(StateRequest {
            thread_id: "mcp-1".into(),
            full: None,
        }))
        .await
        .unwrap();
    assert!(state.contains("Breathing Ladder"));

    let out = server
        .foundry_resolve(Parameters(ResolveRequest {
            thread_id: "mcp-1".into(),
            decision: "edit".into(),
            content: Some("Breathe in for four, out for six.".into()),
        }))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["status"], "waiting_approval");
    assert_eq!(value["revision"], 2);
    assert_eq!(value["oracle_calls"], 2);

    let raw = server
        .foundry_state(Parameters(StateRequest {
            thread_id: "mcp-1".into(),
            full: Some(true),
        }))
        .await
        .unwrap();
    let record: StateRecord = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        record.draft.unwrap().content,
        "Breathe in for four, out for six."
    );
    assert_eq!(oracle.calls().len(), 5);
}

#[tokio::test]
async fn test_mcp_errors_are_strings_with_category() {
    let server = FoundryServer::new(Arc::new(memory_foundry(
        CannedCompletions::new(vec![]),
        FoundryConfig::default(),
    )));

    let err = server
        .foundry_state(Parameters(StateRequest {
            thread_id: "missing".into(),
            full: None,
        }))
        .await
        .unwrap_err();
    assert!(err.contains("not found"));

    let err = server
        .foundry_resolve(Parameters(ResolveRequest {
            thread_id: "missing".into(),
            decision: "approve".into(),
            content: None,
        }))
        .await
        .unwrap_err();
    assert!(err.contains("invalid_request"));

    let err = server
        .foundry_run(Parameters(RunRequest {
            thread_id: None,
            message: None,
        }))
        .await
        .unwrap_err();
    assert!(err.contains("non-empty request"));
}
