//! Watched-type registry
//!
//! Maps a collection's `(watched_type, field_name)` to the commit namespace
//! it follows and the entity type the store must query. Raw entity types
//! need no registration; grouping fields (e.g. the list a task belongs to)
//! are registered with the entity type that holds the groupings.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Query shape and commit namespace behind a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedSource {
    /// Commit sequencer namespace
    pub namespace: String,
    /// Entity type queried from the store
    pub entity_type: String,
}

/// Namespace of a raw entity type
pub fn entity_namespace(entity_type: &str) -> String {
    format!("entities/{entity_type}")
}

/// Namespace of a grouping field of a watched type
pub fn grouping_namespace(watched_type: &str, field_name: &str) -> String {
    format!("groupings/{watched_type}/{field_name}")
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    /// `(watched_type, field_name)` -> grouping entity type
    groupings: HashMap<(String, String), String>,
    /// grouping entity type -> namespace it commits into
    namespaces: HashMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a grouping field, builder style
    #[must_use]
    pub fn with_grouping(
        mut self,
        watched_type: impl Into<String>,
        field_name: impl Into<String>,
        grouping_type: impl Into<String>,
    ) -> Self {
        self.register_grouping(watched_type, field_name, grouping_type);
        self
    }

    /// Register `grouping_type` entities as the groupings of
    /// `watched_type.field_name`
    pub fn register_grouping(
        &mut self,
        watched_type: impl Into<String>,
        field_name: impl Into<String>,
        grouping_type: impl Into<String>,
    ) {
        let watched_type = watched_type.into();
        let field_name = field_name.into();
        let grouping_type = grouping_type.into();

        self.namespaces.insert(
            grouping_type.clone(),
            grouping_namespace(&watched_type, &field_name),
        );
        self.groupings
            .insert((watched_type, field_name), grouping_type);
    }

    /// Resolve what a collection watches
    pub fn resolve(&self, watched_type: &str, field_name: Option<&str>) -> Result<WatchedSource> {
        let Some(field_name) = field_name else {
            return Ok(WatchedSource {
                namespace: self.namespace_for(watched_type),
                entity_type: watched_type.to_string(),
            });
        };

        let grouping_type = self
            .groupings
            .get(&(watched_type.to_string(), field_name.to_string()))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no grouping registered for {watched_type}.{field_name}"
                ))
            })?;

        Ok(WatchedSource {
            namespace: grouping_namespace(watched_type, field_name),
            entity_type: grouping_type.clone(),
        })
    }

    /// Namespace the store advances when it saves an entity of this type
    pub fn namespace_for(&self, entity_type: &str) -> String {
        self.namespaces
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| entity_namespace(entity_type))
    }
}
