//! Export diff: what the partner has not received yet

use std::collections::{HashMap, HashSet};

use super::SyncEngine;
use crate::db::{CollectionRepository, CommitSequencer, EntityQuery, EntityStore, SyncLogStore};
use crate::error::{Error, Result};
use crate::models::{ChangeAction, Collection, EntityId, ExportChange, Filter};
use crate::queue::JobQueue;

/// Ids per query when re-checking previously exported entities
const STALE_CHECK_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Advance and persist the watermark as part of the call
    pub auto_fast_forward: bool,
    /// Only report entities updated at or after this time (Unix ms)
    pub limit_updates_after: Option<i64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            auto_fast_forward: true,
            limit_updates_after: None,
        }
    }
}

impl<E, C, L, K, Q> SyncEngine<'_, E, C, L, K, Q>
where
    E: EntityStore,
    C: CommitSequencer,
    L: SyncLogStore,
    K: CollectionRepository,
    Q: JobQueue,
{
    /// Compute the next batch of changes the partner has not received.
    ///
    /// Results are in ascending commit order. Call again until the result is
    /// empty to drain a backlog larger than one batch.
    pub async fn export_changed(
        &self,
        collection: &mut Collection,
        options: ExportOptions,
    ) -> Result<Vec<ExportChange>> {
        let account_id = collection.require_account()?.to_string();
        let watched_type = collection.require_watched_type()?;
        let source = self
            .registry
            .resolve(watched_type, collection.field_name.as_deref())?;

        let delivered = collection.last_commit_id;
        let head = self.commits.head_commit(&source.namespace).await?;
        if head <= delivered {
            tracing::debug!(
                collection_id = ?collection.id,
                head,
                delivered,
                "Collection is up to date"
            );
            return Ok(Vec::new());
        }

        let filter = Filter::from_conditions(&collection.conditions)?;
        let query = EntityQuery::new(&source.entity_type, &account_id)
            .with_filter(filter)
            .or_deleted()
            .commit_after(delivered)
            .updated_since(options.limit_updates_after)
            .limit(self.batch_size);
        let candidates = self.entities.query(&query).await?;

        let echoes = if candidates.is_empty() {
            HashMap::new()
        } else {
            self.imported_revisions(collection).await?
        };

        let mut changes = Vec::new();
        // Once a change is held back, later commits must not move the watermark
        let mut holding_back = false;

        for entity in &candidates {
            let Some(commit_id) = entity.commit_id else {
                continue;
            };
            let echoed = echoes.get(&entity.id) == Some(&commit_id);

            if !echoed {
                if commit_id <= delivered {
                    tracing::error!(
                        collection_id = ?collection.id,
                        entity_id = %entity.id,
                        commit_id,
                        delivered,
                        "Already delivered commit reappeared in export scan"
                    );
                    return Err(Error::InvariantViolation(format!(
                        "entity {} at commit {commit_id} is not past watermark {delivered}",
                        entity.id
                    )));
                }
                changes.push(ExportChange {
                    id: entity.id.clone(),
                    action: if entity.deleted {
                        ChangeAction::Delete
                    } else {
                        ChangeAction::Change
                    },
                    commit_id: Some(commit_id),
                });
            }

            if options.auto_fast_forward || (echoed && !holding_back) {
                collection.last_commit_id = collection.last_commit_id.max(commit_id);
                if collection.is_persisted() {
                    // Deleted entities stop being tracked
                    let logged = (!entity.deleted).then_some(commit_id);
                    self.log_exported(collection, &entity.id, logged)?;
                }
            } else {
                holding_back = true;
            }
        }

        let mut stale_only = false;
        if changes.is_empty() && !collection.conditions.is_empty() {
            changes = self
                .collect_stale(collection, options.auto_fast_forward)
                .await?;
            stale_only = !changes.is_empty();
        }

        // A short batch means the scan saw every commit up to head
        let exhausted = candidates.len() < self.batch_size;
        let gap_delivered = changes.is_empty() || (stale_only && options.auto_fast_forward);
        if gap_delivered && exhausted && collection.last_commit_id < head {
            tracing::debug!(
                collection_id = ?collection.id,
                head,
                stale = changes.len(),
                "No matching changes behind head; fast-forwarding"
            );
            collection.last_commit_id = head;
        }

        if collection.last_commit_id != delivered {
            tracing::info!(
                collection_id = ?collection.id,
                from = delivered,
                to = collection.last_commit_id,
                changes = changes.len(),
                "Advanced export watermark"
            );
        }
        self.persist_sync_state(collection).await?;

        Ok(changes)
    }

    /// Previously exported entities that no longer match the collection.
    ///
    /// Each is reported once as a delete and its export row is cleared so
    /// later calls do not report it again. Ephemeral collections have no
    /// export log and always return nothing.
    pub async fn exported_stale(&self, collection: &Collection) -> Result<Vec<ExportChange>> {
        self.collect_stale(collection, true).await
    }

    /// Stale scan; with `untrack` false the export rows stay until acknowledged
    async fn collect_stale(&self, collection: &Collection, untrack: bool) -> Result<Vec<ExportChange>> {
        if !collection.is_persisted() {
            return Ok(Vec::new());
        }
        let collection_id = collection.require_id()?;
        let account_id = collection.require_account()?;
        let watched_type = collection.require_watched_type()?;
        let source = self
            .registry
            .resolve(watched_type, collection.field_name.as_deref())?;

        let tracked = self
            .logs
            .get_exported(collection_id)
            .await?
            .into_iter()
            .filter(|entry| entry.commit_id.is_some())
            .map(|entry| entry.unique_id)
            .collect::<Vec<_>>();
        if tracked.is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::from_conditions(&collection.conditions)?;
        let mut still_matching = HashSet::new();
        for chunk in tracked.chunks(STALE_CHECK_CHUNK) {
            let query = EntityQuery::new(&source.entity_type, account_id)
                .with_filter(filter.clone())
                .excluding_deleted()
                .with_ids(chunk.to_vec());
            still_matching.extend(
                self.entities
                    .query(&query)
                    .await?
                    .into_iter()
                    .map(|entity| entity.id),
            );
        }

        let mut stale = Vec::new();
        for id in tracked {
            if still_matching.contains(&id) {
                continue;
            }
            if untrack {
                self.log_exported(collection, &id, None)?;
            }
            stale.push(ExportChange {
                id,
                action: ChangeAction::Delete,
                commit_id: None,
            });
        }

        if !stale.is_empty() {
            tracing::info!(
                collection_id = %collection_id,
                stale = stale.len(),
                "Reporting entities that left the collection"
            );
        }
        Ok(stale)
    }

    /// Confirm delivery of changes returned with `auto_fast_forward = false`
    pub async fn acknowledge_export(
        &self,
        collection: &mut Collection,
        delivered: &[ExportChange],
    ) -> Result<()> {
        for change in delivered {
            match change.commit_id {
                Some(commit_id) => {
                    collection.last_commit_id = collection.last_commit_id.max(commit_id);
                    if collection.is_persisted() {
                        let logged = (change.action == ChangeAction::Change).then_some(commit_id);
                        self.log_exported(collection, &change.id, logged)?;
                    }
                }
                // Stale deletes carry no commit; confirming them stops tracking
                None if change.action == ChangeAction::Delete && collection.is_persisted() => {
                    self.log_exported(collection, &change.id, None)?;
                }
                None => {}
            }
        }
        self.persist_sync_state(collection).await
    }

    /// Local revisions the partner itself produced, by local id
    async fn imported_revisions(&self, collection: &Collection) -> Result<HashMap<EntityId, i64>> {
        let Some(collection_id) = collection.id else {
            return Ok(HashMap::new());
        };

        Ok(self
            .logs
            .get_imported(collection_id)
            .await?
            .into_iter()
            .filter_map(|entry| Some((entry.local_id?, entry.local_revision?)))
            .collect())
    }
}
