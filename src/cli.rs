use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "podgen", about = "Podcast assembly service for archived political speeches")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default when no subcommand is given).
    Serve {
        /// Port override; falls back to the PORT env var, then 3000.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one ingestion sweep and exit.
    Ingest {
        /// Ingest even when the archive is already populated.
        #[arg(long)]
        force: bool,
    },
    /// Probe an OpenRouter key and print the verdict.
    ValidateKey {
        /// The candidate key (sk-or-…).
        key: String,
    },
}
