//! Protocol Foundry coordination core
//!
//! Deterministic orchestration for drafting therapeutic exercises with a
//! fixed set of LLM-backed roles:
//! - State Record model and closed role/route enums
//! - Pure Supervisor routing with version-stamped critiques
//! - Revision and step guardrails
//! - Workflow Engine with per-thread isolation and all-or-nothing steps
//! - Checkpoint Store backends (memory, JSON files, RocksDB behind `heavy-state`)
//! - Step event bus for progress streaming
//!
//! The core makes no network calls. Model access goes through the
//! [`workflow::Oracle`] trait, implemented by the agents crate.
//!
//! # Usage
//!
//! ```ignore
//! use coordination::checkpoint::MemoryCheckpointStore;
//! use coordination::workflow::{Decision, GuardrailEngine, WorkflowEngine};
//!
//! let engine = WorkflowEngine::new(
//!     Arc::new(MemoryCheckpointStore::new()),
//!     oracle,
//!     GuardrailEngine::default(),
//! );
//! let state = engine.run_step("thread-1", Some("a grounding exercise")).await?;
//! let state = engine.resolve("thread-1", Decision::Approve).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod checkpoint;
pub mod events;
pub mod workflow;

pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, IntegrityStatus, MemoryCheckpointStore,
    SharedCheckpointStore, StoreError, StoreResult,
};
#[cfg(feature = "heavy-state")]
pub use checkpoint::RocksCheckpointStore;
pub use events::{EventBus, EventFilter, SharedEventBus, StepEvent};
pub use workflow::{
    Decision, GuardrailConfig, GuardrailEngine, Oracle, OracleError, OracleReply, RetryCategory,
    Role, Route, RunReport, SharedOracle, StateRecord, Status, WorkflowEngine, WorkflowError,
};
