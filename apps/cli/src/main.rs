//! StatuteSync CLI: operator front end for the statute reconciliation engine.
//!
//! Segments statute text, reconciles snapshots, and runs the update pipeline
//! against local files and the libSQL article store.

mod commands;
mod local;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
