//! # Commands
//!
//! ```text
//! commands/
//! ├── mod.rs        ◄─── dispatch + output helpers
//! ├── run.rs        ◄─── long-running daemon
//! ├── sync.rs       ◄─── one-shot sync pass
//! ├── status.rs     ◄─── saved state and catalog summary
//! ├── conflicts.rs  ◄─── list / resolve
//! └── backups.rs    ◄─── list / sweep / verify / restore
//! ```

mod backups;
mod conflicts;
mod run;
mod status;
mod sync;

use serde::Serialize;

use crate::cli::{BackupsCommand, Command, ConflictsCommand};
use wikisync_engine::SyncConfig;

pub async fn dispatch(command: Command, config: SyncConfig, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Run => run::execute(config).await,
        Command::Sync => sync::execute(config, json).await,
        Command::Status => status::execute(config, json).await,
        Command::Conflicts(ConflictsCommand::List) => conflicts::list(config, json).await,
        Command::Conflicts(ConflictsCommand::Resolve {
            id,
            resolution,
            no_sync,
        }) => conflicts::resolve(config, id, resolution, !no_sync).await,
        Command::Backups(BackupsCommand::List { key }) => {
            backups::list(config, key.as_deref(), json).await
        }
        Command::Backups(BackupsCommand::Sweep) => backups::sweep(config, json).await,
        Command::Backups(BackupsCommand::Verify { id }) => backups::verify(config, id, json).await,
        Command::Backups(BackupsCommand::Restore { id, no_sync }) => {
            backups::restore(config, id, !no_sync).await
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
