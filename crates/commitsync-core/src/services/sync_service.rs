//! Shared sync service used by clients.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::config::EngineConfig;
use crate::db::{
    CollectionRepository, CommitSequencer, Database, EntityStore, PurgeReport, SyncLogStore,
};
use crate::error::{Error, Result};
use crate::models::{
    Collection, CollectionId, Entity, EntityId, ExportChange, ImportChange, ManifestEntry,
};
use crate::queue::SyncLogQueue;
use crate::registry::TypeRegistry;
use crate::sync::{ExportOptions, LibSqlStores};

/// Thread-safe service owning the database, the log queue and the registry.
///
/// Sync exchanges on the same collection are serialized; different
/// collections proceed concurrently. Entity writes hold a transaction on the
/// shared connection, so they exclude each other and anything reading the
/// commit heads.
#[derive(Clone)]
pub struct SyncService {
    db: Arc<Database>,
    queue: Arc<SyncLogQueue>,
    registry: Arc<TypeRegistry>,
    config: EngineConfig,
    locks: Arc<Mutex<HashMap<CollectionId, Arc<Mutex<()>>>>>,
    writes: Arc<RwLock<()>>,
}

impl SyncService {
    /// Open a service backed by the database file at `db_path`.
    pub async fn open_path(
        db_path: impl Into<PathBuf>,
        registry: TypeRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Self::from_database(db, registry, config).await
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory(registry: TypeRegistry, config: EngineConfig) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::from_database(db, registry, config).await
    }

    async fn from_database(db: Database, registry: TypeRegistry, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let queue = SyncLogQueue::spawn(db.background_connection().await?, &config);
        Ok(Self {
            db: Arc::new(db),
            queue: Arc::new(queue),
            registry: Arc::new(registry),
            config,
            locks: Arc::new(Mutex::new(HashMap::new())),
            writes: Arc::new(RwLock::new(())),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db.path()
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn stores(&self) -> LibSqlStores<'_> {
        LibSqlStores::new(self.db.connection(), &self.registry)
    }

    async fn lock_collection(&self, id: CollectionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Persist a new collection.
    pub async fn create_collection(&self, collection: &Collection) -> Result<Collection> {
        self.stores().collections.create(collection).await
    }

    /// Fetch a collection by id.
    pub async fn get_collection(&self, id: CollectionId) -> Result<Collection> {
        let stores = self.stores();
        load_collection(&stores, id).await
    }

    /// List collections, optionally for one partner.
    pub async fn list_collections(&self, partner_id: Option<&str>) -> Result<Vec<Collection>> {
        self.stores().collections.list(partner_id).await
    }

    /// Replace a collection's filter and grouping field.
    pub async fn update_collection(&self, collection: &Collection) -> Result<Collection> {
        let id = collection.require_id()?;
        let _guard = self.lock_collection(id).await;
        self.stores().collections.update_definition(collection).await
    }

    /// Delete a collection; its log rows stay until purged.
    pub async fn delete_collection(&self, id: CollectionId) -> Result<()> {
        let _guard = self.lock_collection(id).await;
        self.stores().collections.delete(id).await?;
        self.locks.lock().await.remove(&id);
        Ok(())
    }

    /// Run one export exchange for a collection.
    pub async fn export_changed(
        &self,
        id: CollectionId,
        options: ExportOptions,
    ) -> Result<Vec<ExportChange>> {
        let _guard = self.lock_collection(id).await;
        let _reading = self.writes.read().await;
        let stores = self.stores();
        let mut collection = load_collection(&stores, id).await?;
        stores
            .engine(self.queue.as_ref(), &self.registry, &self.config)
            .export_changed(&mut collection, options)
            .await
    }

    /// Confirm delivery of changes exported without auto fast-forward.
    pub async fn acknowledge_export(&self, id: CollectionId, delivered: &[ExportChange]) -> Result<()> {
        let _guard = self.lock_collection(id).await;
        let stores = self.stores();
        let mut collection = load_collection(&stores, id).await?;
        stores
            .engine(self.queue.as_ref(), &self.registry, &self.config)
            .acknowledge_export(&mut collection, delivered)
            .await
    }

    /// Diff a partner manifest against the collection's import log.
    pub async fn import_changed(
        &self,
        id: CollectionId,
        manifest: &[ManifestEntry],
    ) -> Result<Vec<ImportChange>> {
        let _guard = self.lock_collection(id).await;
        let stores = self.stores();
        let collection = load_collection(&stores, id).await?;
        stores
            .engine(self.queue.as_ref(), &self.registry, &self.config)
            .import_changed(&collection, manifest)
            .await
    }

    /// Record an applied import.
    pub async fn log_imported(
        &self,
        id: CollectionId,
        remote_id: &str,
        remote_revision: &str,
        local: Option<&Entity>,
    ) -> Result<()> {
        let stores = self.stores();
        let collection = load_collection(&stores, id).await?;
        stores
            .engine(self.queue.as_ref(), &self.registry, &self.config)
            .log_imported(
                &collection,
                remote_id,
                remote_revision,
                local.map(|entity| &entity.id),
                local.and_then(|entity| entity.commit_id),
            )
    }

    /// Move a collection's watermark to head, skipping history.
    pub async fn fast_forward(&self, id: CollectionId) -> Result<i64> {
        let _guard = self.lock_collection(id).await;
        let _reading = self.writes.read().await;
        let stores = self.stores();
        let mut collection = load_collection(&stores, id).await?;
        stores
            .engine(self.queue.as_ref(), &self.registry, &self.config)
            .fast_forward_to_head(&mut collection)
            .await
    }

    /// Re-deliver everything after `commit_id` on the next export.
    pub async fn resync_from(&self, id: CollectionId, commit_id: i64) -> Result<()> {
        let _guard = self.lock_collection(id).await;
        let stores = self.stores();
        let mut collection = load_collection(&stores, id).await?;
        stores
            .engine(self.queue.as_ref(), &self.registry, &self.config)
            .resync_from(&mut collection, commit_id)
            .await
    }

    /// Head commit of the namespace a watched type (and field) resolves to.
    pub async fn head_commit(&self, watched_type: &str, field_name: Option<&str>) -> Result<i64> {
        let source = self.registry.resolve(watched_type, field_name)?;
        let _reading = self.writes.read().await;
        self.stores().commits.head_commit(&source.namespace).await
    }

    /// Create or update an entity, stamping a new commit.
    pub async fn save_entity(&self, entity: Entity) -> Result<Entity> {
        let _writing = self.writes.write().await;
        self.stores().entities.save(entity).await
    }

    /// Soft-delete an entity, stamping a new commit.
    pub async fn delete_entity(&self, entity_type: &str, id: &EntityId) -> Result<Entity> {
        let _writing = self.writes.write().await;
        self.stores().entities.delete(entity_type, id).await
    }

    pub async fn get_entity(&self, entity_type: &str, id: &EntityId) -> Result<Option<Entity>> {
        self.stores().entities.get(entity_type, id).await
    }

    /// Drop log rows left behind by deleted collections.
    pub async fn purge_sync_logs(&self) -> Result<PurgeReport> {
        self.queue.flush().await?;
        self.stores().logs.purge_orphaned().await
    }

    /// Wait for queued log writes to land.
    pub async fn flush_logs(&self) -> Result<()> {
        self.queue.flush().await
    }

    /// Sync log writes dropped after exhausting retries
    pub fn failed_log_writes(&self) -> u64 {
        self.queue.failed_jobs()
    }

    /// Drain queued log writes and stop the worker once the last clone is gone.
    pub async fn shutdown(self) -> Result<()> {
        match Arc::try_unwrap(self.queue) {
            Ok(queue) => queue.shutdown().await,
            Err(queue) => queue.flush().await,
        }
    }
}

async fn load_collection(stores: &LibSqlStores<'_>, id: CollectionId) -> Result<Collection> {
    stores
        .collections
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("collection {id}")))
}
