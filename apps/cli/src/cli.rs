//! # Command Line
//!
//! Argument definitions and the configuration overrides they carry.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use wikisync_core::Resolution;
use wikisync_engine::{RemoteBackend, SyncConfig, SyncResult};

/// Bidirectional sync between a Markdown directory and a Wiki.js instance.
#[derive(Debug, Parser)]
#[command(name = "wikisync", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Config file (default: platform config dir / wikisync.toml)
    #[arg(long, short = 'c', global = true, env = "WIKISYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local document root, overriding the config file
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Remote backend: wikijs or memory
    #[arg(long, global = true)]
    pub remote: Option<RemoteBackend>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch and poll until interrupted
    Run,

    /// Run one full sync pass and exit
    Sync,

    /// Summarize the saved sync state
    Status,

    /// Inspect and resolve conflicts held for an operator
    #[command(subcommand)]
    Conflicts(ConflictsCommand),

    /// Inspect the backup catalog
    #[command(subcommand)]
    Backups(BackupsCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConflictsCommand {
    /// List queued conflicts
    List,

    /// Resolve a queued conflict
    Resolve {
        /// Conflict id, as printed by `conflicts list`
        id: Uuid,

        /// use-local, use-remote or skip
        resolution: Resolution,

        /// Record the decision without running a sync pass
        #[arg(long)]
        no_sync: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum BackupsCommand {
    /// List backups, newest first
    List {
        /// Only backups of this document key
        #[arg(long)]
        key: Option<String>,
    },

    /// Delete backups older than the retention window
    Sweep,

    /// Check stored bytes against their recorded checksums
    Verify {
        /// Backup id; every backup when omitted
        id: Option<Uuid>,
    },

    /// Write a backup back to the side it was taken from
    Restore {
        /// Backup id, as printed by `backups list`
        id: Uuid,

        /// Restore without running a sync pass afterwards
        #[arg(long)]
        no_sync: bool,
    },
}

impl GlobalArgs {
    /// Loads the layered configuration and applies command line overrides.
    pub fn load_config(&self) -> SyncResult<SyncConfig> {
        let mut config = SyncConfig::load(self.config.clone())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut SyncConfig) {
        if let Some(root) = &self.root {
            config.local.root = Some(root.clone());
        }
        if let Some(backend) = self.remote {
            config.remote.backend = backend;
        }
    }

    /// Log filter used when RUST_LOG is unset.
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_resolve() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "wikisync",
            "conflicts",
            "resolve",
            &id.to_string(),
            "use-remote",
            "--no-sync",
        ])
        .unwrap();

        match cli.command {
            Command::Conflicts(ConflictsCommand::Resolve {
                id: parsed,
                resolution,
                no_sync,
            }) => {
                assert_eq!(parsed, id);
                assert_eq!(resolution, Resolution::UseRemote);
                assert!(no_sync);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_backup_commands() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["wikisync", "backups", "restore", &id.to_string()]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Backups(BackupsCommand::Restore { id: parsed, no_sync: false }) if parsed == id
        ));

        let cli = Cli::try_parse_from(["wikisync", "backups", "verify"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Backups(BackupsCommand::Verify { id: None })
        ));
    }

    #[test]
    fn test_rejects_unknown_resolution() {
        let id = Uuid::new_v4().to_string();
        let result =
            Cli::try_parse_from(["wikisync", "conflicts", "resolve", &id, "merge"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "wikisync",
            "sync",
            "--root",
            "/srv/docs",
            "--remote",
            "memory",
            "-vv",
        ])
        .unwrap();

        let mut config = SyncConfig::default();
        cli.global.apply(&mut config);
        assert_eq!(config.local.root, Some(PathBuf::from("/srv/docs")));
        assert_eq!(config.remote.backend, RemoteBackend::Memory);
        assert_eq!(cli.global.default_log_filter(), "trace");
    }
}
