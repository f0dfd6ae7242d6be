//! `wikisync conflicts`: the manual resolution queue.

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use super::print_json;
use wikisync_core::{Conflict, Resolution, Side};
use wikisync_engine::{SyncConfig, SyncEngine};

pub async fn list(config: SyncConfig, json: bool) -> anyhow::Result<()> {
    let engine = SyncEngine::builder(config).build();
    let conflicts = engine.list_conflicts().await?;

    if json {
        return print_json(&conflicts);
    }
    if conflicts.is_empty() {
        println!("no conflicts");
        return Ok(());
    }
    for conflict in &conflicts {
        println!("{}", describe(conflict));
    }
    Ok(())
}

/// Resolves a conflict through a short-lived engine. With `sync` set the
/// decision is applied before returning; otherwise the next run applies it.
pub async fn resolve(
    mut config: SyncConfig,
    id: Uuid,
    resolution: Resolution,
    sync: bool,
) -> anyhow::Result<()> {
    config.local.watch = false;
    config.remote.poll = false;

    let mut engine = SyncEngine::builder(config).build();
    engine.start().await.context("failed to start sync engine")?;

    let mut result = engine.resolve_conflict(id, resolution).await;
    if result.is_ok() && sync {
        result = engine.sync_now().await;
    }
    engine.stop().await?;
    result.with_context(|| format!("failed to resolve conflict {}", id))?;

    info!(%id, %resolution, applied = sync, "Conflict resolved");
    println!("resolved {} with {}", id, resolution);
    Ok(())
}

fn describe(conflict: &Conflict) -> String {
    let side = |side: Side| match conflict.hash(side) {
        Some(hash) => hash.short(),
        None if conflict.item(side).is_some() => "directory".to_string(),
        None => "deleted".to_string(),
    };
    format!(
        "{}  {:<28} {}  local={} remote={}  detected {}",
        conflict.id,
        conflict.kind.to_string(),
        conflict.key,
        side(Side::Local),
        side(Side::Remote),
        conflict.detected_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikisync_core::{ChangeKind, ConflictKind, ContentHash, SyncItem, SyncKey};

    #[test]
    fn test_describe_marks_deleted_side() {
        let key = SyncKey::new("ops/runbook.md").unwrap();
        let hash = ContentHash::of(b"local edit");
        let local = SyncItem::new(key.clone(), Side::Local, ChangeKind::Modified, Some(hash));
        let conflict = Conflict::new(
            key,
            ConflictKind::RemoteDeleteLocalModify,
            Some(local),
            None,
        );

        let line = describe(&conflict);
        assert!(line.contains("ops/runbook.md"));
        assert!(line.contains(&format!("local={}", hash.short())));
        assert!(line.contains("remote=deleted"));
    }

    #[tokio::test]
    async fn test_list_reads_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::for_directory(dir.path());
        list(config, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_unknown_conflict_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let config = SyncConfig::for_directory(dir.path());

        let result = resolve(config, Uuid::new_v4(), Resolution::Skip, true).await;
        assert!(result.is_err());
    }
}
