//! Entity store implementation
//!
//! Entities keep their attributes in a JSON `fields` column. Every save or
//! delete advances the commit namespace the registry assigns to the entity
//! type and stamps the result on the row.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::{params_from_iter, Connection, Value as SqlValue};
use serde_json::{Map, Value};

use super::commit_repository::{CommitSequencer, LibSqlCommitSequencer};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityId, Filter, Operator};
use crate::registry::TypeRegistry;
use crate::util::unix_timestamp_millis;

const ENTITY_COLUMNS: &str =
    "id, entity_type, account_id, fields, commit_id, is_deleted, created_at, updated_at";

/// Filtered, commit-ordered entity query
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    pub entity_type: String,
    pub account_id: String,
    pub filter: Option<Filter>,
    /// OR the filter with `deleted = true` so removals stay visible
    pub or_deleted: bool,
    /// Drop soft-deleted rows
    pub exclude_deleted: bool,
    /// `commit_id > n`, which also excludes unstamped rows
    pub commit_after: Option<i64>,
    /// `updated_at >= t` (Unix ms)
    pub updated_since: Option<i64>,
    /// Restrict to these ids
    pub ids: Option<Vec<EntityId>>,
    pub limit: Option<usize>,
}

impl EntityQuery {
    pub fn new(entity_type: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub const fn or_deleted(mut self) -> Self {
        self.or_deleted = true;
        self
    }

    #[must_use]
    pub const fn excluding_deleted(mut self) -> Self {
        self.exclude_deleted = true;
        self
    }

    #[must_use]
    pub const fn commit_after(mut self, commit_id: i64) -> Self {
        self.commit_after = Some(commit_id);
        self
    }

    #[must_use]
    pub const fn updated_since(mut self, timestamp: Option<i64>) -> Self {
        self.updated_since = timestamp;
        self
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Vec<EntityId>) -> Self {
        self.ids = Some(ids);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build the SQL text and bound parameters
    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut clauses = vec!["entity_type = ?".to_string(), "account_id = ?".to_string()];
        let mut params = vec![
            SqlValue::Text(self.entity_type.clone()),
            SqlValue::Text(self.account_id.clone()),
        ];

        if let Some(commit_id) = self.commit_after {
            clauses.push("commit_id IS NOT NULL AND commit_id > ?".to_string());
            params.push(SqlValue::Integer(commit_id));
        }

        if let Some(timestamp) = self.updated_since {
            clauses.push("updated_at >= ?".to_string());
            params.push(SqlValue::Integer(timestamp));
        }

        if let Some(ids) = &self.ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("id IN ({placeholders})"));
            params.extend(ids.iter().map(|id| SqlValue::Text(id.to_string())));
        }

        if let Some(filter) = &self.filter {
            let compiled = compile_filter(filter, &mut params);
            if self.or_deleted {
                clauses.push(format!("({compiled} OR is_deleted = 1)"));
            } else {
                clauses.push(compiled);
            }
        }

        if self.exclude_deleted {
            clauses.push("is_deleted = 0".to_string());
        }

        let mut sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE {} ORDER BY commit_id ASC, id ASC",
            clauses.join(" AND ")
        );
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(limit as i64));
        }

        (sql, params)
    }
}

/// Compile a filter tree into a parenthesized SQL boolean expression.
///
/// Field names were validated when the tree was built, so they are inlined
/// into the JSON path; values are always bound.
fn compile_filter(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    match filter {
        Filter::Comparison(comparison) => {
            let column = format!("json_extract(fields, '$.{}')", comparison.field);
            let value = &comparison.value;
            match comparison.operator {
                Operator::IsNull => format!("({column} IS NULL)"),
                Operator::NotNull => format!("({column} IS NOT NULL)"),
                Operator::Eq if value.is_null() => format!("({column} IS NULL)"),
                Operator::NotEq if value.is_null() => format!("({column} IS NOT NULL)"),
                Operator::Eq => {
                    params.push(json_to_sql(value));
                    format!("({column} = ?)")
                }
                Operator::NotEq => {
                    params.push(json_to_sql(value));
                    format!("({column} IS NULL OR {column} <> ?)")
                }
                Operator::Lt => {
                    params.push(json_to_sql(value));
                    format!("({column} < ?)")
                }
                Operator::Lte => {
                    params.push(json_to_sql(value));
                    format!("({column} <= ?)")
                }
                Operator::Gt => {
                    params.push(json_to_sql(value));
                    format!("({column} > ?)")
                }
                Operator::Gte => {
                    params.push(json_to_sql(value));
                    format!("({column} >= ?)")
                }
                Operator::Contains => {
                    params.push(json_to_sql(value));
                    format!("(instr({column}, ?) > 0)")
                }
            }
        }
        Filter::And(children) => join_filters(children, " AND ", "1", params),
        Filter::Or(children) => join_filters(children, " OR ", "0", params),
    }
}

fn join_filters(
    children: &[Filter],
    separator: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> String {
    if children.is_empty() {
        return format!("({empty})");
    }
    let parts = children
        .iter()
        .map(|child| compile_filter(child, params))
        .collect::<Vec<_>>();
    format!("({})", parts.join(separator))
}

/// Bind a JSON value the way `json_extract` reports it
fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number.as_i64().map_or_else(
            || SqlValue::Real(number.as_f64().unwrap_or_default()),
            SqlValue::Integer,
        ),
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Trait for entity storage operations
#[allow(async_fn_in_trait)]
pub trait EntityStore {
    /// Get an entity by id, including soft-deleted ones
    async fn get(&self, entity_type: &str, id: &EntityId) -> Result<Option<Entity>>;

    /// Run a filtered query ordered by ascending commit
    async fn query(&self, query: &EntityQuery) -> Result<Vec<Entity>>;

    /// Insert or update an entity, stamping a new commit
    async fn save(&self, entity: Entity) -> Result<Entity>;

    /// Soft delete an entity, stamping a new commit
    async fn delete(&self, entity_type: &str, id: &EntityId) -> Result<Entity>;
}

/// libSQL implementation of `EntityStore`
pub struct LibSqlEntityStore<'a> {
    conn: &'a Connection,
    registry: &'a TypeRegistry,
}

impl<'a> LibSqlEntityStore<'a> {
    /// Create a new store with the given connection and type registry
    pub const fn new(conn: &'a Connection, registry: &'a TypeRegistry) -> Self {
        Self { conn, registry }
    }

    async fn stamp(&self, entity_type: &str) -> Result<i64> {
        let namespace = self.registry.namespace_for(entity_type);
        LibSqlCommitSequencer::new(self.conn)
            .advance(&namespace)
            .await
    }

    /// Take the write lock so a commit and its row become visible together
    async fn begin_write(&self) -> Result<()> {
        self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        Ok(())
    }

    /// Commit on success, roll back otherwise
    async fn finish_write<T>(&self, outcome: Result<T>) -> Result<T> {
        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        };
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(value)
    }

    async fn upsert_stamped(&self, entity: &Entity, fields: String) -> Result<i64> {
        let commit_id = self.stamp(&entity.entity_type).await?;
        let now = unix_timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO entities (id, entity_type, account_id, fields, commit_id, is_deleted, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(entity_type, id) DO UPDATE SET
                     account_id = excluded.account_id,
                     fields = excluded.fields,
                     commit_id = excluded.commit_id,
                     is_deleted = excluded.is_deleted,
                     updated_at = excluded.updated_at",
                params_from_iter(vec![
                    SqlValue::Text(entity.id.to_string()),
                    SqlValue::Text(entity.entity_type.clone()),
                    SqlValue::Text(entity.account_id.clone()),
                    SqlValue::Text(fields),
                    SqlValue::Integer(commit_id),
                    SqlValue::Integer(i64::from(entity.deleted)),
                    SqlValue::Integer(entity.created_at),
                    SqlValue::Integer(now),
                ]),
            )
            .await?;
        Ok(commit_id)
    }

    async fn mark_deleted(&self, entity_type: &str, id: &EntityId) -> Result<i64> {
        let commit_id = self.stamp(entity_type).await?;
        let now = unix_timestamp_millis();

        self.conn
            .execute(
                "UPDATE entities SET is_deleted = 1, commit_id = ?, updated_at = ?
                 WHERE entity_type = ? AND id = ?",
                params_from_iter(vec![
                    SqlValue::Integer(commit_id),
                    SqlValue::Integer(now),
                    SqlValue::Text(entity_type.to_string()),
                    SqlValue::Text(id.to_string()),
                ]),
            )
            .await?;
        Ok(commit_id)
    }

    /// Parse an entity from a database row
    fn parse_entity(row: &libsql::Row) -> Result<Entity> {
        let id: String = row.get(0)?;
        let fields: String = row.get(3)?;
        let fields: Map<String, Value> = serde_json::from_str(&fields)?;

        Ok(Entity {
            id: EntityId::from(id.as_str()),
            entity_type: row.get(1)?,
            account_id: row.get(2)?,
            fields,
            commit_id: row.get::<Option<i64>>(4)?,
            deleted: row.get::<i32>(5)? != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl EntityStore for LibSqlEntityStore<'_> {
    async fn get(&self, entity_type: &str, id: &EntityId) -> Result<Option<Entity>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_type = ? AND id = ?"),
                [entity_type, id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn query(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        if query.ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let (sql, params) = query.to_sql();
        let mut rows = self.conn.query(&sql, params_from_iter(params)).await?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(Self::parse_entity(&row)?);
        }
        Ok(entities)
    }

    async fn save(&self, entity: Entity) -> Result<Entity> {
        if entity.entity_type.trim().is_empty() || entity.account_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "entity type and account are required".into(),
            ));
        }

        let fields = serde_json::to_string(&entity.fields)?;

        self.begin_write().await?;
        let written = self.upsert_stamped(&entity, fields).await;
        let commit_id = self.finish_write(written).await?;

        tracing::debug!(
            entity_type = %entity.entity_type,
            id = %entity.id,
            commit_id,
            "Saved entity"
        );

        self.get(&entity.entity_type, &entity.id)
            .await?
            .ok_or_else(|| Error::NotFound(entity.id.to_string()))
    }

    async fn delete(&self, entity_type: &str, id: &EntityId) -> Result<Entity> {
        let existing = self.get(entity_type, id).await?;
        if !existing.is_some_and(|entity| !entity.deleted) {
            return Err(Error::NotFound(id.to_string()));
        }

        self.begin_write().await?;
        let written = self.mark_deleted(entity_type, id).await;
        let commit_id = self.finish_write(written).await?;

        tracing::debug!(entity_type, id = %id, commit_id, "Soft deleted entity");

        self.get(entity_type, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}
