//! # wikisync
//!
//! Operator CLI for the wikisync engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          wikisync CLI                                   │
//! │                                                                         │
//! │  args ──► SyncConfig (file → env → flags) ──► command                   │
//! │                                                 │                       │
//! │            run / sync / conflicts resolve ──────┼──► SyncEngine         │
//! │            status / conflicts list ─────────────┼──► state file         │
//! │            backups list / sweep ────────────────┴──► backup catalog     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod cli;
mod commands;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.global.default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.global.load_config()?;
    debug!(
        root = ?config.local.root,
        backend = %config.remote.backend,
        "Configuration loaded"
    );

    commands::dispatch(cli.command, config, cli.global.json).await
}
