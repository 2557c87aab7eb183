//! Export/import change records and sync log rows

use serde::{Deserialize, Serialize};

use super::{CollectionId, EntityId};

/// What a partner or the local side must do with an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Change,
    Delete,
}

/// One entry of an export diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportChange {
    pub id: EntityId,
    pub action: ChangeAction,
    /// Commit being delivered; absent for stale deletions
    pub commit_id: Option<i64>,
}

/// One object the partner currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub remote_id: String,
    pub remote_revision: String,
}

impl ManifestEntry {
    pub fn new(remote_id: impl Into<String>, remote_revision: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            remote_revision: remote_revision.into(),
        }
    }
}

/// Local revision assumed for remote objects that have never been imported
pub const DEFAULT_LOCAL_REVISION: i64 = 1;

/// One entry of an import diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportChange {
    pub remote_id: String,
    pub remote_revision: String,
    pub local_id: Option<EntityId>,
    pub local_revision: i64,
    pub action: ChangeAction,
}

/// Export log row: `commit_id = None` means "reported stale, no longer tracked"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub collection_id: CollectionId,
    pub unique_id: EntityId,
    pub commit_id: Option<i64>,
}

/// Import log row, one per remote object per collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedEntry {
    pub collection_id: CollectionId,
    pub remote_id: String,
    pub remote_revision: String,
    pub local_id: Option<EntityId>,
    pub local_revision: Option<i64>,
}
