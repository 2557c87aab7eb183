//! Sync log store: exported and imported rows per collection
//!
//! Both tables are keyed by `(collection_id, id)` and every write is an
//! upsert, so replaying a queued write is harmless.

use libsql::{params_from_iter, Connection, Value as SqlValue};

use crate::error::Result;
use crate::models::{CollectionId, EntityId, ExportedEntry, ImportedEntry};
use crate::util::unix_timestamp_millis;

/// Rows removed by a maintenance purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub exported: u64,
    pub imported: u64,
}

/// Trait for sync log storage operations
#[allow(async_fn_in_trait)]
pub trait SyncLogStore {
    /// Everything logged as exported for a collection, ordered by id
    async fn get_exported(&self, collection_id: CollectionId) -> Result<Vec<ExportedEntry>>;

    /// Everything logged as imported for a collection, ordered by remote id
    async fn get_imported(&self, collection_id: CollectionId) -> Result<Vec<ImportedEntry>>;

    /// Upsert an export row; `None` marks the object as no longer tracked
    async fn write_exported(
        &self,
        collection_id: CollectionId,
        unique_id: &EntityId,
        commit_id: Option<i64>,
    ) -> Result<()>;

    /// Upsert an import row
    async fn write_imported(&self, entry: &ImportedEntry) -> Result<()>;

    /// Remove rows whose collection no longer exists
    async fn purge_orphaned(&self) -> Result<PurgeReport>;
}

/// libSQL implementation of `SyncLogStore`
pub struct LibSqlSyncLogStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncLogStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncLogStore for LibSqlSyncLogStore<'_> {
    async fn get_exported(&self, collection_id: CollectionId) -> Result<Vec<ExportedEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT unique_id, commit_id FROM sync_export_log
                 WHERE collection_id = ?
                 ORDER BY unique_id",
                [collection_id.get()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let unique_id: String = row.get(0)?;
            entries.push(ExportedEntry {
                collection_id,
                unique_id: EntityId::from(unique_id.as_str()),
                commit_id: row.get::<Option<i64>>(1)?,
            });
        }
        Ok(entries)
    }

    async fn get_imported(&self, collection_id: CollectionId) -> Result<Vec<ImportedEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT remote_id, remote_revision, local_id, local_revision FROM sync_import_log
                 WHERE collection_id = ?
                 ORDER BY remote_id",
                [collection_id.get()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let local_id: Option<String> = row.get(2)?;
            entries.push(ImportedEntry {
                collection_id,
                remote_id: row.get(0)?,
                remote_revision: row.get(1)?,
                local_id: local_id.as_deref().map(EntityId::from),
                local_revision: row.get::<Option<i64>>(3)?,
            });
        }
        Ok(entries)
    }

    async fn write_exported(
        &self,
        collection_id: CollectionId,
        unique_id: &EntityId,
        commit_id: Option<i64>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_export_log (collection_id, unique_id, commit_id, logged_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(collection_id, unique_id) DO UPDATE SET
                     commit_id = excluded.commit_id,
                     logged_at = excluded.logged_at",
                params_from_iter(vec![
                    SqlValue::Integer(collection_id.get()),
                    SqlValue::Text(unique_id.to_string()),
                    commit_id.map_or(SqlValue::Null, SqlValue::Integer),
                    SqlValue::Integer(unix_timestamp_millis()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn write_imported(&self, entry: &ImportedEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_import_log (collection_id, remote_id, remote_revision, local_id, local_revision, logged_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(collection_id, remote_id) DO UPDATE SET
                     remote_revision = excluded.remote_revision,
                     local_id = excluded.local_id,
                     local_revision = excluded.local_revision,
                     logged_at = excluded.logged_at",
                params_from_iter(vec![
                    SqlValue::Integer(entry.collection_id.get()),
                    SqlValue::Text(entry.remote_id.clone()),
                    SqlValue::Text(entry.remote_revision.clone()),
                    entry
                        .local_id
                        .as_ref()
                        .map_or(SqlValue::Null, |id| SqlValue::Text(id.to_string())),
                    entry.local_revision.map_or(SqlValue::Null, SqlValue::Integer),
                    SqlValue::Integer(unix_timestamp_millis()),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn purge_orphaned(&self) -> Result<PurgeReport> {
        let exported = self
            .conn
            .execute(
                "DELETE FROM sync_export_log
                 WHERE collection_id NOT IN (SELECT id FROM collections)",
                (),
            )
            .await?;
        let imported = self
            .conn
            .execute(
                "DELETE FROM sync_import_log
                 WHERE collection_id NOT IN (SELECT id FROM collections)",
                (),
            )
            .await?;

        tracing::info!(exported, imported, "Purged orphaned sync log rows");
        Ok(PurgeReport { exported, imported })
    }
}
