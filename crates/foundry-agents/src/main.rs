use anyhow::Result;
use clap::Parser;
use foundry_agents::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout belongs to the CLI output and the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,foundry_agents=info,coordination=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::execute(cli).await
}
