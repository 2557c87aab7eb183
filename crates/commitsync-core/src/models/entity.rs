//! Entity model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, stable entity identifier.
///
/// Ids minted by the store are UUID v7 strings (time-sortable), but partners
/// and imports may bring any non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create a new unique entity ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::util::non_blank(s)
            .map(|id| Self(id.to_string()))
            .ok_or_else(|| crate::Error::InvalidInput("entity id must not be empty".into()))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// An entity as seen by the sync core.
///
/// Only `id`, `commit_id` and `deleted` matter to the diffing algorithms;
/// `fields` exist for filter evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier
    pub id: EntityId,
    /// Entity type name, e.g. `task`
    pub entity_type: String,
    /// Tenant the entity belongs to
    pub account_id: String,
    /// Arbitrary attributes used by collection filters
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Commit at which the entity was last mutated
    pub commit_id: Option<i64>,
    /// Soft delete flag; deletion is itself a commit
    pub deleted: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Entity {
    /// Create an unsaved entity with a fresh id and no commit
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        account_id: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: EntityId::new(),
            entity_type: entity_type.into(),
            account_id: account_id.into(),
            fields,
            commit_id: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set an explicit id (e.g. one supplied by an import)
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    /// Look up a field value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_id_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn test_entity_id_parse_rejects_blank() {
        assert!("  ".parse::<EntityId>().is_err());
        let parsed: EntityId = " T1 ".parse().unwrap();
        assert_eq!(parsed.as_str(), "T1");
    }

    #[test]
    fn test_entity_new_is_unstamped() {
        let mut fields = Map::new();
        fields.insert("owner".into(), json!("U"));
        let entity = Entity::new("task", "acme", fields);

        assert_eq!(entity.commit_id, None);
        assert!(!entity.deleted);
        assert_eq!(entity.field("owner"), Some(&json!("U")));
        assert_eq!(entity.created_at, entity.updated_at);
    }
}
