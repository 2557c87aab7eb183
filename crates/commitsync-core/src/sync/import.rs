//! Import diff: reconcile a partner manifest with the import log

use std::collections::{HashMap, HashSet};

use super::SyncEngine;
use crate::db::{CollectionRepository, CommitSequencer, EntityStore, SyncLogStore};
use crate::error::Result;
use crate::models::{
    ChangeAction, Collection, ImportChange, ImportedEntry, ManifestEntry, DEFAULT_LOCAL_REVISION,
};
use crate::queue::JobQueue;

impl<E, C, L, K, Q> SyncEngine<'_, E, C, L, K, Q>
where
    E: EntityStore,
    C: CommitSequencer,
    L: SyncLogStore,
    K: CollectionRepository,
    Q: JobQueue,
{
    /// Work out what must change locally given everything the partner holds
    pub async fn import_changed(
        &self,
        collection: &Collection,
        manifest: &[ManifestEntry],
    ) -> Result<Vec<ImportChange>> {
        collection.require_account()?;

        let logged = match collection.id {
            Some(collection_id) => self.logs.get_imported(collection_id).await?,
            None => Vec::new(),
        };
        let changes = diff_import(logged, manifest);

        tracing::debug!(
            collection_id = ?collection.id,
            manifest = manifest.len(),
            changes = changes.len(),
            "Computed import diff"
        );
        Ok(changes)
    }
}

/// Three-way diff between the import log and a partner manifest.
///
/// - logged and absent from the manifest: `Delete`
/// - logged with a different remote revision: `Change` carrying the new revision
/// - logged with the same remote revision: omitted
/// - only in the manifest: `Change` with no local id
///
/// Logged rows keep their order and new rows follow in manifest order. When
/// the manifest repeats a remote id, its last revision wins.
pub fn diff_import(logged: Vec<ImportedEntry>, manifest: &[ManifestEntry]) -> Vec<ImportChange> {
    let mut incoming: HashMap<&str, &str> = HashMap::with_capacity(manifest.len());
    let mut order = Vec::with_capacity(manifest.len());
    for entry in manifest {
        if incoming
            .insert(entry.remote_id.as_str(), entry.remote_revision.as_str())
            .is_none()
        {
            order.push(entry.remote_id.as_str());
        }
    }

    let mut changes = Vec::with_capacity(logged.len() + order.len());
    let mut known = HashSet::with_capacity(logged.len());

    for entry in logged {
        known.insert(entry.remote_id.clone());
        let local_revision = entry.local_revision.unwrap_or(DEFAULT_LOCAL_REVISION);
        match incoming.get(entry.remote_id.as_str()) {
            None => changes.push(ImportChange {
                remote_id: entry.remote_id,
                remote_revision: entry.remote_revision,
                local_id: entry.local_id,
                local_revision,
                action: ChangeAction::Delete,
            }),
            Some(revision) if *revision == entry.remote_revision => {}
            Some(revision) => changes.push(ImportChange {
                remote_id: entry.remote_id,
                remote_revision: (*revision).to_string(),
                local_id: entry.local_id,
                local_revision,
                action: ChangeAction::Change,
            }),
        }
    }

    for remote_id in order {
        if known.contains(remote_id) {
            continue;
        }
        changes.push(ImportChange {
            remote_id: remote_id.to_string(),
            remote_revision: incoming[remote_id].to_string(),
            local_id: None,
            local_revision: DEFAULT_LOCAL_REVISION,
            action: ChangeAction::Change,
        });
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{CollectionId, EntityId};
    use crate::sync::testing::{owned_by, Fixture};
    use pretty_assertions::assert_eq;

    fn logged(remote_id: &str, revision: &str, local: Option<(&str, i64)>) -> ImportedEntry {
        ImportedEntry {
            collection_id: CollectionId::new(1).unwrap(),
            remote_id: remote_id.into(),
            remote_revision: revision.into(),
            local_id: local.map(|(id, _)| EntityId::from(id)),
            local_revision: local.map(|(_, revision)| revision),
        }
    }

    fn actions(changes: &[ImportChange]) -> Vec<(&str, &str, ChangeAction)> {
        changes
            .iter()
            .map(|change| {
                (
                    change.remote_id.as_str(),
                    change.remote_revision.as_str(),
                    change.action,
                )
            })
            .collect()
    }

    #[test]
    fn test_three_way_diff() {
        let log = vec![
            logged("a", "1", Some(("A", 4))),
            logged("b", "1", Some(("B", 2))),
            logged("c", "1", None),
        ];
        let manifest = [
            ManifestEntry::new("a", "1"),
            ManifestEntry::new("b", "2"),
            ManifestEntry::new("d", "1"),
        ];

        let changes = diff_import(log, &manifest);
        assert_eq!(
            actions(&changes),
            vec![
                ("b", "2", ChangeAction::Change),
                ("c", "1", ChangeAction::Delete),
                ("d", "1", ChangeAction::Change),
            ]
        );

        // Updated rows keep their local identity
        assert_eq!(changes[0].local_id, Some(EntityId::from("B")));
        assert_eq!(changes[0].local_revision, 2);
        // Rows imported without a local revision fall back to the default
        assert_eq!(changes[1].local_revision, DEFAULT_LOCAL_REVISION);
        assert_eq!(changes[2].local_id, None);
        assert_eq!(changes[2].local_revision, DEFAULT_LOCAL_REVISION);
    }

    #[test]
    fn test_empty_manifest_deletes_everything_logged() {
        let log = vec![logged("a", "1", None), logged("b", "7", None)];
        let changes = diff_import(log, &[]);
        assert!(changes
            .iter()
            .all(|change| change.action == ChangeAction::Delete));
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_empty_log_changes_everything_in_manifest() {
        let manifest = [ManifestEntry::new("x", "1"), ManifestEntry::new("y", "1")];
        let changes = diff_import(Vec::new(), &manifest);
        assert_eq!(
            actions(&changes),
            vec![("x", "1", ChangeAction::Change), ("y", "1", ChangeAction::Change)]
        );
    }

    #[test]
    fn test_in_sync_manifest_yields_nothing() {
        let log = vec![logged("a", "1", None), logged("b", "2", None)];
        let manifest = [ManifestEntry::new("b", "2"), ManifestEntry::new("a", "1")];
        assert!(diff_import(log, &manifest).is_empty());
    }

    #[test]
    fn test_repeated_manifest_id_uses_last_revision() {
        let manifest = [
            ManifestEntry::new("x", "1"),
            ManifestEntry::new("x", "2"),
        ];
        let changes = diff_import(Vec::new(), &manifest);
        assert_eq!(actions(&changes), vec![("x", "2", ChangeAction::Change)]);

        let log = vec![logged("a", "1", None)];
        let manifest = [ManifestEntry::new("a", "1"), ManifestEntry::new("a", "3")];
        assert_eq!(
            actions(&diff_import(log, &manifest)),
            vec![("a", "3", ChangeAction::Change)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_import_changed_reads_collection_log() {
        let fixture = Fixture::new().await;
        let stores = fixture.stores();
        let engine = fixture.engine(&stores);
        let collection = fixture.owned_by(&stores, "U").await;

        engine
            .log_imported(&collection, "r-1", "etag-1", Some(&EntityId::from("T1")), Some(1))
            .unwrap();
        engine
            .log_imported(&collection, "r-2", "etag-1", None, None)
            .unwrap();
        fixture.queue.flush().await.unwrap();

        let manifest = [
            ManifestEntry::new("r-1", "etag-2"),
            ManifestEntry::new("r-3", "etag-1"),
        ];
        let changes = engine.import_changed(&collection, &manifest).await.unwrap();
        assert_eq!(
            actions(&changes),
            vec![
                ("r-1", "etag-2", ChangeAction::Change),
                ("r-2", "etag-1", ChangeAction::Delete),
                ("r-3", "etag-1", ChangeAction::Change),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ephemeral_collection_treats_manifest_as_new() {
        let fixture = Fixture::new().await;
        let stores = fixture.stores();
        let engine = fixture.engine(&stores);

        let changes = engine
            .import_changed(&owned_by("U"), &[ManifestEntry::new("r-1", "a")])
            .await
            .unwrap();
        assert_eq!(actions(&changes), vec![("r-1", "a", ChangeAction::Change)]);

        let mut unscoped = owned_by("U");
        unscoped.account_id = None;
        assert!(matches!(
            engine.import_changed(&unscoped, &[]).await,
            Err(Error::Configuration(_))
        ));
    }
}
