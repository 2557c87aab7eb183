//! Commit-based sync engine.
//!
//! [`SyncEngine`] computes what a partner has not seen yet (export), what
//! changed on the partner's side (import), and keeps the sync logs that make
//! both directions idempotent.

mod export;
mod import;

pub use export::ExportOptions;
pub use import::diff_import;

use libsql::Connection;

use crate::config::EngineConfig;
use crate::db::{
    CollectionRepository, CommitSequencer, EntityStore, LibSqlCollectionRepository,
    LibSqlCommitSequencer, LibSqlEntityStore, LibSqlSyncLogStore, SyncLogStore,
};
use crate::error::{Error, Result};
use crate::models::{Collection, EntityId, ImportedEntry};
use crate::queue::{JobQueue, SyncLogJob};
use crate::registry::TypeRegistry;
use crate::util::unix_timestamp_millis;

/// Sync algorithms bound to their collaborators.
///
/// Callers must serialize calls per collection: two concurrent exports of
/// the same collection could move the watermark past an undelivered commit.
pub struct SyncEngine<'a, E, C, L, K, Q> {
    entities: &'a E,
    commits: &'a C,
    logs: &'a L,
    collections: &'a K,
    queue: &'a Q,
    registry: &'a TypeRegistry,
    batch_size: usize,
}

impl<'a, E, C, L, K, Q> SyncEngine<'a, E, C, L, K, Q>
where
    E: EntityStore,
    C: CommitSequencer,
    L: SyncLogStore,
    K: CollectionRepository,
    Q: JobQueue,
{
    pub fn new(
        entities: &'a E,
        commits: &'a C,
        logs: &'a L,
        collections: &'a K,
        queue: &'a Q,
        registry: &'a TypeRegistry,
        config: &EngineConfig,
    ) -> Self {
        Self {
            entities,
            commits,
            logs,
            collections,
            queue,
            registry,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Move the watermark to the namespace head unconditionally.
    ///
    /// Used when an export finds nothing to deliver in the gap, and by
    /// operators who want a new partnership to skip history.
    pub async fn fast_forward_to_head(&self, collection: &mut Collection) -> Result<i64> {
        let watched_type = collection.require_watched_type()?;
        let source = self
            .registry
            .resolve(watched_type, collection.field_name.as_deref())?;
        let head = self.commits.head_commit(&source.namespace).await?;

        tracing::info!(
            collection_id = ?collection.id,
            from = collection.last_commit_id,
            to = head,
            "Fast-forwarding collection to head"
        );
        collection.last_commit_id = head;
        self.reset_sync_state(collection).await?;
        Ok(head)
    }

    /// Move the watermark back (or forward) to `commit_id` so the partner
    /// receives everything after it again.
    pub async fn resync_from(&self, collection: &mut Collection, commit_id: i64) -> Result<()> {
        if commit_id < 0 {
            return Err(Error::InvalidInput(format!(
                "watermark cannot be negative: {commit_id}"
            )));
        }
        tracing::info!(
            collection_id = ?collection.id,
            from = collection.last_commit_id,
            to = commit_id,
            "Resynchronizing collection"
        );
        collection.last_commit_id = commit_id;
        self.reset_sync_state(collection).await
    }

    /// Record that a remote object was imported.
    ///
    /// With both `local_id` and `local_revision`, the local revision is also
    /// logged as exported: the partner already holds it.
    pub fn log_imported(
        &self,
        collection: &Collection,
        remote_id: &str,
        remote_revision: &str,
        local_id: Option<&EntityId>,
        local_revision: Option<i64>,
    ) -> Result<()> {
        let collection_id = collection.require_id()?;
        collection.require_account()?;

        self.queue.enqueue(SyncLogJob::WriteImported(ImportedEntry {
            collection_id,
            remote_id: remote_id.to_string(),
            remote_revision: remote_revision.to_string(),
            local_id: local_id.cloned(),
            local_revision,
        }))?;

        if let (Some(local_id), Some(local_revision)) = (local_id, local_revision) {
            self.log_exported(collection, local_id, Some(local_revision))?;
        }
        Ok(())
    }

    /// Record what was sent for an object; `None` marks it as no longer tracked
    pub fn log_exported(
        &self,
        collection: &Collection,
        unique_id: &EntityId,
        commit_id: Option<i64>,
    ) -> Result<()> {
        let collection_id = collection.require_id()?;
        collection.require_account()?;

        self.queue.enqueue(SyncLogJob::WriteExported {
            collection_id,
            unique_id: unique_id.clone(),
            commit_id,
        })
    }

    /// Stamp the exchange time and write the watermark before returning
    async fn persist_sync_state(&self, collection: &mut Collection) -> Result<()> {
        collection.last_sync = Some(unix_timestamp_millis());
        if collection.is_persisted() {
            self.collections.save_sync_state(collection).await?;
        }
        Ok(())
    }

    /// Like `persist_sync_state`, but allowed to move the watermark back
    async fn reset_sync_state(&self, collection: &mut Collection) -> Result<()> {
        collection.last_sync = Some(unix_timestamp_millis());
        if collection.is_persisted() {
            self.collections.reset_sync_state(collection).await?;
        }
        Ok(())
    }
}

/// libSQL-backed stores sharing one connection
pub struct LibSqlStores<'a> {
    pub entities: LibSqlEntityStore<'a>,
    pub commits: LibSqlCommitSequencer<'a>,
    pub logs: LibSqlSyncLogStore<'a>,
    pub collections: LibSqlCollectionRepository<'a>,
}

pub type LibSqlEngine<'a, Q> = SyncEngine<
    'a,
    LibSqlEntityStore<'a>,
    LibSqlCommitSequencer<'a>,
    LibSqlSyncLogStore<'a>,
    LibSqlCollectionRepository<'a>,
    Q,
>;

impl<'a> LibSqlStores<'a> {
    pub const fn new(conn: &'a Connection, registry: &'a TypeRegistry) -> Self {
        Self {
            entities: LibSqlEntityStore::new(conn, registry),
            commits: LibSqlCommitSequencer::new(conn),
            logs: LibSqlSyncLogStore::new(conn),
            collections: LibSqlCollectionRepository::new(conn),
        }
    }

    /// Bind an engine to these stores
    pub fn engine<Q: JobQueue>(
        &'a self,
        queue: &'a Q,
        registry: &'a TypeRegistry,
        config: &EngineConfig,
    ) -> LibSqlEngine<'a, Q> {
        SyncEngine::new(
            &self.entities,
            &self.commits,
            &self.logs,
            &self.collections,
            queue,
            registry,
            config,
        )
    }
}
