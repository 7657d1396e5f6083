//! `brain`: submit and track jobs on a running Agent Brain.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agent_brain::cli::{Cli, execute};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    execute(Cli::parse()).await?;
    Ok(())
}
