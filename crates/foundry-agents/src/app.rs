//! Wiring: config to checkpoint store, oracle and engine, plus the telemetry
//! hook shared by the CLI and the MCP server.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use coordination::checkpoint::{FileCheckpointStore, MemoryCheckpointStore, SharedCheckpointStore};
use coordination::workflow::{
    Decision, GuardrailEngine, RunReport, SharedOracle, StateRecord, WorkflowEngine,
    WorkflowError,
};
use tracing::info;

use crate::config::{FoundryConfig, StoreBackend};
use crate::oracle::LlmOracle;
use crate::telemetry::{append_telemetry, elapsed_ms, RunMetrics};

/// Open the checkpoint store selected by `config`.
pub async fn open_store(config: &FoundryConfig) -> Result<SharedCheckpointStore> {
    let store: SharedCheckpointStore = match config.store {
        StoreBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
        StoreBackend::File => Arc::new(
            FileCheckpointStore::open(&config.state_dir)
                .await
                .with_context(|| {
                    format!("Failed to open checkpoint dir {}", config.state_dir.display())
                })?,
        ),
        StoreBackend::Rocks => open_rocks(config)?,
    };
    info!(backend = store.backend(), "Checkpoint store ready");
    Ok(store)
}

#[cfg(feature = "heavy-state")]
fn open_rocks(config: &FoundryConfig) -> Result<SharedCheckpointStore> {
    let store = coordination::checkpoint::RocksCheckpointStore::open(&config.state_dir)
        .with_context(|| format!("Failed to open RocksDB at {}", config.state_dir.display()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "heavy-state"))]
fn open_rocks(_config: &FoundryConfig) -> Result<SharedCheckpointStore> {
    anyhow::bail!("the rocks store backend needs foundry built with --features heavy-state")
}

/// Engine plus the host-side concerns around it.
pub struct Foundry {
    engine: Arc<WorkflowEngine>,
    config: FoundryConfig,
}

impl Foundry {
    /// Build the store and the chat-completion oracle from `config`.
    pub async fn open(config: FoundryConfig) -> Result<Self> {
        let store = open_store(&config).await?;
        let oracle = LlmOracle::new(&config).context("Failed to build HTTP client")?;
        info!(
            url = %config.llm.url,
            model = %config.llm.model,
            max_revisions = config.guardrails.max_revisions,
            step_budget = config.guardrails.step_budget,
            "Foundry ready"
        );
        Ok(Self::with_parts(config, store, Arc::new(oracle)))
    }

    pub fn with_parts(config: FoundryConfig, store: SharedCheckpointStore, oracle: SharedOracle) -> Self {
        let engine = WorkflowEngine::new(
            store,
            oracle,
            GuardrailEngine::new(config.guardrails.clone()),
        );
        Self {
            engine: Arc::new(engine),
            config,
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn config(&self) -> &FoundryConfig {
        &self.config
    }

    /// `run_step` with telemetry.
    pub async fn run(
        &self,
        thread_id: &str,
        message: Option<&str>,
    ) -> Result<RunReport, WorkflowError> {
        let started = Instant::now();
        let result = self.engine.run_step_report(thread_id, message).await;
        self.record(thread_id, "run", &result, started);
        result
    }

    /// `resolve` with telemetry.
    pub async fn resolve(
        &self,
        thread_id: &str,
        decision: Decision,
    ) -> Result<RunReport, WorkflowError> {
        let trigger = format!("resolve:{}", decision.label());
        let started = Instant::now();
        let result = self.engine.resolve_report(thread_id, decision).await;
        self.record(thread_id, &trigger, &result, started);
        result
    }

    pub async fn state(&self, thread_id: &str) -> Result<Option<StateRecord>, WorkflowError> {
        self.engine.get_state(thread_id).await
    }

    pub async fn threads(&self) -> Result<Vec<String>, WorkflowError> {
        self.engine.list_threads().await
    }

    fn record(
        &self,
        thread_id: &str,
        trigger: &str,
        result: &Result<RunReport, WorkflowError>,
        started: Instant,
    ) {
        let Some(path) = &self.config.telemetry_path else {
            return;
        };
        let metrics = match result {
            Ok(report) => RunMetrics::from_report(trigger, report),
            Err(e) => RunMetrics::from_error(
                thread_id,
                trigger,
                e,
                elapsed_ms(started),
            ),
        };
        append_telemetry(&metrics, path);
    }
}
