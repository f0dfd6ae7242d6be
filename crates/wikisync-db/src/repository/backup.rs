//! # Backup Catalog Repository
//!
//! Row-level access to the `backups` table.
//!
//! ## Retention Queries
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  key "a.md":   b1 (40d)   b2 (35d)   b3 (2d)     ← newest kept         │
//! │  key "b.md":   b4 (60d)                          ← newest kept         │
//! │                                                                         │
//! │  list_older_than(30d)  →  b1, b2, b4                                   │
//! │  latest_per_key()      →  b3, b4                                       │
//! │  sweep deletes          →  b1, b2                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timestamps are stored as unix microseconds so range scans compare integers.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use wikisync_core::{Backup, ContentHash, SyncKey};

const BACKUP_COLUMNS: &str = "id, key, side, content_ref, size, created_at, reason";

/// Raw catalog row.
#[derive(Debug, Clone, FromRow)]
struct BackupRow {
    id: String,
    key: String,
    side: String,
    content_ref: String,
    size: i64,
    created_at: i64,
    reason: String,
}

impl TryFrom<BackupRow> for Backup {
    type Error = DbError;

    fn try_from(row: BackupRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id).map_err(|e| DbError::corrupt(&row.id, e))?;
        let key = SyncKey::new(row.key).map_err(|e| DbError::corrupt(&row.id, e))?;
        let side = row.side.parse().map_err(|e| DbError::corrupt(&row.id, e))?;
        let content_ref: ContentHash = row
            .content_ref
            .parse()
            .map_err(|e| DbError::corrupt(&row.id, e))?;
        let reason = row.reason.parse().map_err(|e| DbError::corrupt(&row.id, e))?;
        let created_at = DateTime::<Utc>::from_timestamp_micros(row.created_at)
            .ok_or_else(|| DbError::corrupt(&row.id, "created_at out of range"))?;

        Ok(Backup {
            id,
            key,
            side,
            content_ref,
            size: u64::try_from(row.size).map_err(|e| DbError::corrupt(&row.id, e))?,
            created_at,
            reason,
        })
    }
}

fn into_backups(rows: Vec<BackupRow>) -> DbResult<Vec<Backup>> {
    rows.into_iter().map(Backup::try_from).collect()
}

/// Repository for backup catalog operations.
#[derive(Debug, Clone)]
pub struct BackupRepository {
    pool: SqlitePool,
}

impl BackupRepository {
    /// Creates a new BackupRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BackupRepository { pool }
    }

    /// Inserts a catalog row.
    pub async fn insert(&self, backup: &Backup) -> DbResult<()> {
        debug!(
            key = %backup.key,
            side = %backup.side,
            content_ref = %backup.content_ref.short(),
            "Recording backup"
        );

        sqlx::query(
            r#"
            INSERT INTO backups (id, key, side, content_ref, size, created_at, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(backup.id.to_string())
        .bind(backup.key.as_str())
        .bind(backup.side.to_string())
        .bind(backup.content_ref.to_hex())
        .bind(i64::try_from(backup.size).unwrap_or(i64::MAX))
        .bind(backup.created_at.timestamp_micros())
        .bind(backup.reason.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a backup by id.
    pub async fn get(&self, id: Uuid) -> DbResult<Option<Backup>> {
        let row: Option<BackupRow> =
            sqlx::query_as(&format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = ?1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Backup::try_from).transpose()
    }

    /// Lists backups for one key, newest first.
    pub async fn list_for_key(&self, key: &SyncKey) -> DbResult<Vec<Backup>> {
        let rows: Vec<BackupRow> = sqlx::query_as(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups WHERE key = ?1 ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_backups(rows)
    }

    /// Lists every backup, newest first.
    pub async fn list_all(&self) -> DbResult<Vec<Backup>> {
        let rows: Vec<BackupRow> = sqlx::query_as(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        into_backups(rows)
    }

    /// Lists backups created strictly before `cutoff`, oldest first.
    pub async fn list_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Backup>> {
        let rows: Vec<BackupRow> = sqlx::query_as(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups WHERE created_at < ?1 ORDER BY created_at ASC"
        ))
        .bind(cutoff.timestamp_micros())
        .fetch_all(&self.pool)
        .await?;

        into_backups(rows)
    }

    /// Returns the newest backup of every key.
    pub async fn latest_per_key(&self) -> DbResult<Vec<Backup>> {
        let rows: Vec<BackupRow> = sqlx::query_as(&format!(
            r#"
            SELECT {BACKUP_COLUMNS} FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY key ORDER BY created_at DESC, rowid DESC
                ) AS rn
                FROM backups
            )
            WHERE rn = 1
            ORDER BY key ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        into_backups(rows)
    }

    /// Deletes a catalog row. Returns false if it did not exist.
    pub async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts catalog rows that reference a blob.
    pub async fn count_refs(&self, content_ref: &ContentHash) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups WHERE content_ref = ?1")
            .bind(content_ref.to_hex())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Total number of catalog rows.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use wikisync_core::{BackupReason, Side};

    fn backup(key: &str, bytes: &[u8], age_days: i64) -> Backup {
        Backup {
            id: Uuid::new_v4(),
            key: SyncKey::new(key).unwrap(),
            side: Side::Remote,
            content_ref: ContentHash::of(bytes),
            size: bytes.len() as u64,
            created_at: Utc::now() - Duration::days(age_days),
            reason: BackupReason::RoutineSync,
        }
    }

    async fn repo() -> BackupRepository {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.backups()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = repo().await;
        let b = backup("notes/a.md", b"hello", 0);
        repo.insert(&b).await.unwrap();

        let fetched = repo.get(b.id).await.unwrap().unwrap();
        assert_eq!(fetched.key, b.key);
        assert_eq!(fetched.content_ref, b.content_ref);
        assert_eq!(fetched.size, 5);
        assert_eq!(
            fetched.created_at.timestamp_micros(),
            b.created_at.timestamp_micros()
        );

        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retention_queries() {
        let repo = repo().await;
        let b1 = backup("a.md", b"1", 40);
        let b2 = backup("a.md", b"2", 35);
        let b3 = backup("a.md", b"3", 2);
        let b4 = backup("b.md", b"4", 60);
        for b in [&b1, &b2, &b3, &b4] {
            repo.insert(b).await.unwrap();
        }

        let old: Vec<Uuid> = repo
            .list_older_than(Utc::now() - Duration::days(30))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(old, vec![b4.id, b1.id, b2.id]);

        let latest: Vec<Uuid> = repo
            .latest_per_key()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(latest, vec![b3.id, b4.id]);
    }

    #[tokio::test]
    async fn test_delete_and_ref_count() {
        let repo = repo().await;
        let b1 = backup("a.md", b"same", 1);
        let b2 = backup("b.md", b"same", 0);
        repo.insert(&b1).await.unwrap();
        repo.insert(&b2).await.unwrap();

        assert_eq!(repo.count_refs(&b1.content_ref).await.unwrap(), 2);
        assert!(repo.delete(b1.id).await.unwrap());
        assert!(!repo.delete(b1.id).await.unwrap());
        assert_eq!(repo.count_refs(&b1.content_ref).await.unwrap(), 1);

        let listed = repo.list_for_key(&SyncKey::new("b.md").unwrap()).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
