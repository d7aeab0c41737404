//! `foundry` command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coordination::events::{EventBusExt, EventFilter};
use coordination::workflow::{Decision, RunReport, StateRecord, WorkflowError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::app::Foundry;
use crate::config::{FoundryConfig, StoreBackend};
use crate::mcp::FoundryServer;
use crate::render;
use crate::telemetry::TelemetryReader;

#[derive(Parser, Debug)]
#[command(name = "foundry", author, version, about = "Supervised multi-agent drafting of CBT exercises")]
pub struct Cli {
    /// TOML config file, applied over environment variables
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Checkpoint backend (overrides FOUNDRY_STORE)
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreBackend>,

    /// Checkpoint directory (overrides FOUNDRY_STATE_DIR)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Chat-completion endpoint URL (overrides FOUNDRY_LLM_URL)
    #[arg(long, global = true)]
    pub llm_url: Option<String>,

    /// Model name (overrides FOUNDRY_MODEL)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Draft versions allowed before a rejection becomes terminal
    #[arg(long, global = true)]
    pub max_revisions: Option<u32>,

    /// Role invocations allowed per run before it pauses
    #[arg(long, global = true)]
    pub step_budget: Option<u32>,

    /// Append per-run metrics to this JSONL file
    #[arg(long, global = true)]
    pub telemetry: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Interactive session: describe a challenge, then refine, edit or approve
    Chat {
        /// Resume an existing thread instead of starting a new one
        #[arg(long)]
        thread: Option<String>,
    },
    /// Run the workflow once and print the summary
    Run {
        /// Thread to continue; a new one is created when omitted
        #[arg(long)]
        thread: Option<String>,
        /// Request for a new thread, or feedback for an existing one
        message: Option<String>,
    },
    /// Show a thread
    Show {
        thread: String,
        /// Print the full exercise rather than the summary
        #[arg(long, conflicts_with = "json")]
        full: bool,
        /// Print the raw state record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve or edit a draft awaiting review
    Resolve {
        thread: String,
        #[command(subcommand)]
        decision: ResolveCommand,
    },
    /// List known threads
    Threads,
    /// Summarise recorded run telemetry
    Stats {
        /// Only count runs for this thread
        #[arg(long)]
        thread: Option<String>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the MCP tools over stdio
    Mcp,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ResolveCommand {
    /// Accept the current draft
    Approve,
    /// Replace the draft content and send it back for review
    Edit {
        /// New exercise content
        content: String,
    },
}

impl From<ResolveCommand> for Decision {
    fn from(cmd: ResolveCommand) -> Self {
        match cmd {
            ResolveCommand::Approve => Decision::Approve,
            ResolveCommand::Edit { content } => Decision::Edit(content),
        }
    }
}

impl Cli {
    /// Environment and `--config` layers with this command line's flags on top.
    pub fn resolve_config(&self) -> Result<FoundryConfig> {
        let mut config = FoundryConfig::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut FoundryConfig) {
        if let Some(store) = self.store {
            config.store = store;
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(url) = &self.llm_url {
            config.llm.url = url.clone();
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(max) = self.max_revisions {
            config.guardrails.max_revisions = max;
        }
        if let Some(budget) = self.step_budget {
            config.guardrails.step_budget = budget;
        }
        if let Some(path) = &self.telemetry {
            config.telemetry_path = Some(path.clone());
        }
    }
}

/// Execute a parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.resolve_config()?;
    let foundry = Arc::new(Foundry::open(config).await?);

    match cli.command {
        Command::Chat { thread } => chat(&foundry, thread).await,
        Command::Run { thread, message } => {
            let thread = match thread {
                Some(thread) => thread,
                None if message.is_some() => new_thread_id("run"),
                None => bail!("a new thread needs a message"),
            };
            let report = foundry.run(&thread, message.as_deref()).await?;
            print_report(&report);
            Ok(())
        }
        Command::Show { thread, full, json } => {
            let state = foundry
                .state(&thread)
                .await?
                .ok_or_else(|| WorkflowError::ThreadNotFound(thread.clone()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if full {
                println!("{}", render::presentation(&state).unwrap_or_else(|| state.status_line()));
            } else {
                print_state(&state);
            }
            Ok(())
        }
        Command::Resolve { thread, decision } => {
            let report = foundry.resolve(&thread, decision.into()).await?;
            print_report(&report);
            Ok(())
        }
        Command::Threads => {
            for thread in foundry.threads().await? {
                match foundry.state(&thread).await {
                    Ok(Some(state)) => println!("{}", state.status_line()),
                    Ok(None) => println!("{}", thread),
                    Err(e) => println!("{}  (unreadable: {})", thread, e),
                }
            }
            Ok(())
        }
        Command::Mcp => FoundryServer::new(foundry).serve_stdio().await,
        Command::Stats { thread, json } => stats(foundry.config(), thread.as_deref(), json),
    }
}

fn stats(config: &FoundryConfig, thread: Option<&str>, json: bool) -> Result<()> {
    let Some(path) = config.telemetry_path.as_deref() else {
        bail!("no telemetry file configured (set --telemetry or FOUNDRY_TELEMETRY_PATH)");
    };
    let reader = TelemetryReader::read_from_file(path)
        .with_context(|| format!("reading telemetry from {}", path.display()))?;
    let summary = match thread {
        Some(thread) => reader.thread_summary(thread),
        None => reader.summary(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

/// One line typed into the chat loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Quit,
    Full,
    Approve,
    Edit(String),
    /// `edit` typed without replacement text.
    EditUsage,
    /// Resume a paused or failed run without new input.
    Continue,
    Message(String),
    Empty,
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        match line.to_ascii_lowercase().as_str() {
            "quit" | "exit" | "q" => return Self::Quit,
            "full" => return Self::Full,
            "approve" => return Self::Approve,
            "continue" | "retry" => return Self::Continue,
            "edit" => return Self::EditUsage,
            _ => {}
        }
        match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) if cmd.eq_ignore_ascii_case("edit") => {
                Self::Edit(rest.trim().to_string())
            }
            _ => Self::Message(line.to_string()),
        }
    }
}

async fn chat(foundry: &Foundry, thread: Option<String>) -> Result<()> {
    let thread = thread.unwrap_or_else(|| new_thread_id("chat"));
    println!("Protocol Foundry  (thread {})", thread);
    println!("Describe what you are struggling with and an exercise will be drafted for you.");
    println!("Commands: `full`, `approve`, `edit <text>`, `continue`, `quit`.");

    let progress = spawn_progress(foundry, thread.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("you> ");
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };

        let result = match ChatInput::parse(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Full => {
                match foundry.state(&thread).await {
                    Ok(Some(state)) => match render::presentation(&state) {
                        Some(text) => println!("{}", text),
                        None => println!("No exercise yet. Send a message first."),
                    },
                    Ok(None) => println!("No exercise yet. Send a message first."),
                    Err(e) => println!("error: {}", e),
                }
                continue;
            }
            ChatInput::EditUsage => {
                println!("Usage: edit <replacement exercise text>");
                continue;
            }
            ChatInput::Approve => foundry.resolve(&thread, Decision::Approve).await,
            ChatInput::Edit(content) => foundry.resolve(&thread, Decision::Edit(content)).await,
            ChatInput::Continue => foundry.run(&thread, None).await,
            ChatInput::Message(text) => foundry.run(&thread, Some(&text)).await,
        };

        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                println!("error: {}", e);
                if e.is_retriable() {
                    println!("This looks temporary; send `continue` to retry.");
                }
            }
        }
    }

    progress.abort();
    println!("Goodbye. Take care.");
    Ok(())
}

/// Print step events for `thread` to stderr while a run is in flight.
fn spawn_progress(foundry: &Foundry, thread: String) -> tokio::task::JoinHandle<()> {
    let filter = EventFilter::new()
        .thread(&thread)
        .types(vec!["role_completed", "anomaly_healed", "step_failed"]);
    let mut rx = foundry.engine().events().subscribe_filtered(filter);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => eprintln!("  -> {}", event.describe()),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_report(report: &RunReport) {
    print_state(&report.state);
    if report.budget_exhausted {
        println!(
            "\nPaused after {} steps (step budget). Run again to continue.",
            report.steps
        );
    }
}

fn print_state(state: &StateRecord) {
    println!("{}", state.status_line());
    match render::summary(state) {
        Some(summary) => println!("\n{}", summary),
        None => {
            if let Some(last) = state.messages.last() {
                println!("{}: {}", last.author, last.content);
            }
        }
    }
}

fn new_thread_id(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}
