//! Protocol Foundry agents
//!
//! Host side of the drafting workflow: the chat-completion oracle that backs
//! the Drafter and both reviewers, their prompts, configuration, rendering,
//! run telemetry, the `foundry` CLI and the MCP tool server.

#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod cli;
pub mod config;
pub mod mcp;
pub mod oracle;
pub mod prompts;
pub mod render;
pub mod telemetry;

pub use app::Foundry;
pub use config::{FoundryConfig, StoreBackend};
pub use oracle::LlmOracle;
