//! MCP tool server over stdio.
//!
//! Exposes the drafting workflow to desktop assistants:
//! - `foundry_run`: start a thread or continue one
//! - `foundry_state`: read a thread's current record
//! - `foundry_resolve`: approve or edit a draft awaiting review

// Suppress false positive dead_code warnings from #[tool_router] macro and serde deserialization
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use coordination::workflow::{Decision, RunReport, StateRecord, WorkflowError};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{stdin, stdout};

use crate::app::Foundry;
use crate::render;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RunRequest {
    #[schemars(
        description = "Thread id. Omit to start a new thread; a fresh id is generated and returned."
    )]
    pub thread_id: Option<String>,
    #[schemars(
        description = "User message. Required for a new thread (the exercise request); on an existing thread it is treated as feedback on the current draft."
    )]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StateRequest {
    #[schemars(description = "Thread id to read")]
    pub thread_id: String,
    #[schemars(
        description = "Return the full state record as JSON instead of the readable summary (default: false)"
    )]
    pub full: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ResolveRequest {
    #[schemars(description = "Thread id awaiting review")]
    pub thread_id: String,
    #[schemars(description = "Either \"approve\" or \"edit\"")]
    pub decision: String,
    #[schemars(description = "Replacement exercise content; required when decision is \"edit\"")]
    pub content: Option<String>,
}

#[derive(Clone)]
pub struct FoundryServer {
    foundry: Arc<Foundry>,
    tool_router: ToolRouter<Self>,
}

impl FoundryServer {
    pub fn new(foundry: Arc<Foundry>) -> Self {
        Self {
            foundry,
            tool_router: Self::tool_router(),
        }
    }

    /// Serve on stdin/stdout until the client disconnects.
    pub async fn serve_stdio(self) -> Result<()> {
        tracing::info!("Starting Foundry MCP server on stdio");
        let service = self.serve((stdin(), stdout())).await?;
        service.waiting().await?;
        Ok(())
    }
}

fn parse_decision(decision: &str, content: Option<String>) -> Result<Decision, String> {
    match decision.trim().to_ascii_lowercase().as_str() {
        "approve" => Ok(Decision::Approve),
        "edit" => match content.filter(|c| !c.trim().is_empty()) {
            Some(content) => Ok(Decision::Edit(content)),
            None => Err("decision \"edit\" needs non-empty content".to_string()),
        },
        other => Err(format!(
            "unknown decision \"{}\" (expected \"approve\" or \"edit\")",
            other
        )),
    }
}

fn report_json(report: &RunReport) -> String {
    let state = &report.state;
    let body = json!({
        "thread_id": state.thread_id,
        "status": state.status,
        "revision": state.revision_count,
        "steps": report.steps,
        "oracle_calls": report.oracle_calls,
        "budget_exhausted": report.budget_exhausted,
        "summary": render::summary(state),
        "messages": state.messages.iter().rev().take(3).rev().map(|m| {
            json!({"author": m.author.to_string(), "content": m.content})
        }).collect::<Vec<_>>(),
    });
    serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
}

fn error_text(err: &WorkflowError) -> String {
    let mut text = format!(
        "{} (category: {}, retriable: {})",
        err,
        err.retry_category(),
        err.is_retriable()
    );
    if let Some(snapshot) = err.snapshot() {
        text.push_str(&format!("\nlast committed: {}", snapshot.status_line()));
    }
    text
}

fn state_text(state: &StateRecord, full: bool) -> Result<String, String> {
    if full {
        return serde_json::to_string_pretty(state).map_err(|e| e.to_string());
    }
    let mut text = state.status_line();
    match render::summary(state) {
        Some(summary) => {
            text.push_str("\n\n");
            text.push_str(&summary);
        }
        None => text.push_str("\n\nNo draft yet."),
    }
    Ok(text)
}

#[tool_router]
impl FoundryServer {
    #[tool(
        description = "Run the CBT exercise drafting workflow. Drafter, Safety Guardian and Clinical Critic iterate until both reviewers approve (status waiting_approval) or the revision limit is hit. Pass a message to start a thread or to give feedback on its draft."
    )]
    pub async fn foundry_run(
        &self,
        Parameters(req): Parameters<RunRequest>,
    ) -> Result<String, String> {
        let thread_id = req
            .thread_id
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("mcp-{}", uuid::Uuid::new_v4().simple()));
        let report = self
            .foundry
            .run(&thread_id, req.message.as_deref())
            .await
            .map_err(|e| error_text(&e))?;
        Ok(report_json(&report))
    }

    #[tool(
        description = "Read the current state of a drafting thread: status, revision count, scores and the exercise summary. Read-only."
    )]
    pub async fn foundry_state(
        &self,
        Parameters(req): Parameters<StateRequest>,
    ) -> Result<String, String> {
        let state = self
            .foundry
            .state(&req.thread_id)
            .await
            .map_err(|e| error_text(&e))?
            .ok_or_else(|| format!("thread '{}' not found", req.thread_id))?;
        state_text(&state, req.full.unwrap_or(false))
    }

    #[tool(
        description = "Resolve a thread awaiting human review. \"approve\" finalises the draft; \"edit\" replaces its content and sends it back through both reviewers."
    )]
    pub async fn foundry_resolve(
        &self,
        Parameters(req): Parameters<ResolveRequest>,
    ) -> Result<String, String> {
        let decision = parse_decision(&req.decision, req.content)?;
        let report = self
            .foundry
            .resolve(&req.thread_id, decision)
            .await
            .map_err(|e| error_text(&e))?;
        Ok(report_json(&report))
    }
}

#[tool_handler]
impl ServerHandler for FoundryServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = "MCP server for Protocol Foundry, a supervised multi-agent workflow that drafts CBT exercises.\n\
                 - foundry_run: start a thread (message = request) or send feedback to an existing one\n\
                 - foundry_state: read status, scores and the exercise summary (full=true for the raw record)\n\
                 - foundry_resolve: approve a draft in waiting_approval, or edit it and trigger re-review\n\n\
                 Typical flow: foundry_run -> status waiting_approval -> foundry_state -> foundry_resolve(approve).\n\
                 Errors include a retry category; transient, rate_limit and parse_failure are safe to retry.";

        ServerInfo {
            instructions: Some(instructions.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
