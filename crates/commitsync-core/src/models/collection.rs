//! Collection model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Condition;
use crate::error::{Error, Result};
use crate::util::non_blank;

/// Persistent identifier of a collection, assigned on first save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(i64);

impl CollectionId {
    /// Wrap a stored row id; zero and negative ids mean "not persisted"
    pub const fn new(value: i64) -> Option<Self> {
        if value > 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| Error::InvalidInput(format!("invalid collection id '{s}'")))
    }
}

/// One partner's subscription to one watched type.
///
/// A collection without an `id` is ephemeral: it can compute diffs but
/// never reads or writes the sync log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Option<CollectionId>,
    pub partner_id: String,
    /// Tenant scope
    pub account_id: Option<String>,
    /// Entity type the partner follows
    pub watched_type: String,
    /// Grouping field when the collection tracks groupings instead of raw entities
    pub field_name: Option<String>,
    /// Ordered filter clauses
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Export watermark: highest commit already delivered
    pub last_commit_id: i64,
    /// Last successful exchange (Unix ms)
    pub last_sync: Option<i64>,
    /// Bumped whenever the definition changes
    pub revision: i64,
}

impl Collection {
    /// Create an unsaved collection starting at commit 0
    pub fn new(
        partner_id: impl Into<String>,
        account_id: impl Into<String>,
        watched_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            partner_id: partner_id.into(),
            account_id: Some(account_id.into()),
            watched_type: watched_type.into(),
            field_name: None,
            conditions: Vec::new(),
            last_commit_id: 0,
            last_sync: None,
            revision: 0,
        }
    }

    /// Track a grouping field of the watched type
    #[must_use]
    pub fn with_field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Start the watermark at an explicit commit
    #[must_use]
    pub const fn starting_at(mut self, commit_id: i64) -> Self {
        self.last_commit_id = commit_id;
        self
    }

    pub const fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Tenant scope, or a configuration error
    pub fn require_account(&self) -> Result<&str> {
        self.account_id
            .as_deref()
            .and_then(non_blank)
            .ok_or_else(|| Error::Configuration("collection has no account scope".into()))
    }

    /// Watched type, or a configuration error
    pub fn require_watched_type(&self) -> Result<&str> {
        non_blank(&self.watched_type)
            .ok_or_else(|| Error::Configuration("collection has no watched type".into()))
    }

    /// Persisted id, or a configuration error
    pub fn require_id(&self) -> Result<CollectionId> {
        self.id
            .ok_or_else(|| Error::Configuration("collection has not been persisted".into()))
    }
}
