mod cli;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    dispatch(cli).await
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { paths, company } => cli::ingest::run(&cli.db, &paths, &company).await,
        Commands::Dedup { company, apply } => cli::dedup::run(&cli.db, &company, apply).await,
        Commands::Status { company } => cli::status::run(&cli.db, &company).await,
    }
}
