pub mod dedup;
pub mod ingest;
pub mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lflow",
    about = "Financial export ingestion and reconciliation",
    version
)]
pub struct Cli {
    /// Database path
    #[arg(long, global = true, default_value = "ledgerflow.db")]
    pub db: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run financial files through the extraction pipeline
    Ingest {
        /// File path(s) to ingest
        paths: Vec<String>,
        /// Company the transactions belong to
        #[arg(long, default_value = "default")]
        company: String,
    },
    /// Report duplicate transactions, optionally deleting them
    Dedup {
        /// Company to scan
        #[arg(long, default_value = "default")]
        company: String,
        /// Delete duplicates instead of only reporting them
        #[arg(long)]
        apply: bool,
    },
    /// Show stored totals and classification queue depth
    Status {
        /// Company to report on
        #[arg(long, default_value = "default")]
        company: String,
    },
}
