//! Collection repository implementation

use libsql::{params_from_iter, Connection, Value as SqlValue};

use crate::error::{Error, Result};
use crate::models::{Collection, CollectionId, Condition};
use crate::util::unix_timestamp_millis;

const COLLECTION_COLUMNS: &str = "id, partner_id, account_id, watched_type, field_name, conditions, last_commit_id, last_sync, revision";

/// Trait for collection storage operations
#[allow(async_fn_in_trait)]
pub trait CollectionRepository {
    /// Persist a new collection, assigning its id and revision 1
    async fn create(&self, collection: &Collection) -> Result<Collection>;

    /// Get a collection by id
    async fn get(&self, id: CollectionId) -> Result<Option<Collection>>;

    /// List collections, optionally for a single partner
    async fn list(&self, partner_id: Option<&str>) -> Result<Vec<Collection>>;

    /// Store a changed definition (scope, field, conditions) and bump the revision
    async fn update_definition(&self, collection: &Collection) -> Result<Collection>;

    /// Store the watermark and last sync time; refuses to move the watermark back
    async fn save_sync_state(&self, collection: &Collection) -> Result<()>;

    /// Store the watermark and last sync time even when it moves back
    async fn reset_sync_state(&self, collection: &Collection) -> Result<()>;

    /// Delete a collection. Its sync log rows are left for a maintenance purge.
    async fn delete(&self, id: CollectionId) -> Result<()>;
}

/// libSQL implementation of `CollectionRepository`
pub struct LibSqlCollectionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCollectionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn optional_text(value: Option<&str>) -> SqlValue {
        value.map_or(SqlValue::Null, |text| SqlValue::Text(text.to_string()))
    }

    /// Parse a collection from a database row
    fn parse_collection(row: &libsql::Row) -> Result<Collection> {
        let id: i64 = row.get(0)?;
        let conditions: String = row.get(5)?;
        let conditions: Vec<Condition> = serde_json::from_str(&conditions)?;

        Ok(Collection {
            id: CollectionId::new(id),
            partner_id: row.get(1)?,
            account_id: row.get::<Option<String>>(2)?,
            watched_type: row.get(3)?,
            field_name: row.get::<Option<String>>(4)?,
            conditions,
            last_commit_id: row.get(6)?,
            last_sync: row.get::<Option<i64>>(7)?,
            revision: row.get(8)?,
        })
    }

    fn validate(collection: &Collection) -> Result<()> {
        if collection.partner_id.trim().is_empty() {
            return Err(Error::InvalidInput("partner id is required".into()));
        }
        collection.require_watched_type()?;
        for condition in &collection.conditions {
            condition.validate()?;
        }
        Ok(())
    }
}

impl CollectionRepository for LibSqlCollectionRepository<'_> {
    async fn create(&self, collection: &Collection) -> Result<Collection> {
        Self::validate(collection)?;
        let conditions = serde_json::to_string(&collection.conditions)?;

        let mut rows = self
            .conn
            .query(
                "INSERT INTO collections (partner_id, account_id, watched_type, field_name, conditions, last_commit_id, last_sync, revision, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
                 RETURNING id",
                params_from_iter(vec![
                    SqlValue::Text(collection.partner_id.clone()),
                    Self::optional_text(collection.account_id.as_deref()),
                    SqlValue::Text(collection.watched_type.clone()),
                    Self::optional_text(collection.field_name.as_deref()),
                    SqlValue::Text(conditions),
                    SqlValue::Integer(collection.last_commit_id),
                    collection.last_sync.map_or(SqlValue::Null, SqlValue::Integer),
                    SqlValue::Integer(unix_timestamp_millis()),
                ]),
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("collection insert returned no id".into()))?;
        let id = CollectionId::new(row.get::<i64>(0)?)
            .ok_or_else(|| Error::Database("collection insert returned invalid id".into()))?;

        tracing::info!(
            collection_id = %id,
            partner_id = %collection.partner_id,
            watched_type = %collection.watched_type,
            "Created collection"
        );

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("collection {id}")))
    }

    async fn get(&self, id: CollectionId) -> Result<Option<Collection>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?"),
                [id.get()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_collection(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, partner_id: Option<&str>) -> Result<Vec<Collection>> {
        let mut rows = match partner_id {
            Some(partner_id) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {COLLECTION_COLUMNS} FROM collections WHERE partner_id = ? ORDER BY id"
                        ),
                        [partner_id],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {COLLECTION_COLUMNS} FROM collections ORDER BY id"),
                        (),
                    )
                    .await?
            }
        };

        let mut collections = Vec::new();
        while let Some(row) = rows.next().await? {
            collections.push(Self::parse_collection(&row)?);
        }
        Ok(collections)
    }

    async fn update_definition(&self, collection: &Collection) -> Result<Collection> {
        let id = collection.require_id()?;
        Self::validate(collection)?;
        let conditions = serde_json::to_string(&collection.conditions)?;

        let updated = self
            .conn
            .execute(
                "UPDATE collections
                 SET partner_id = ?, account_id = ?, watched_type = ?, field_name = ?, conditions = ?,
                     revision = revision + 1
                 WHERE id = ?",
                params_from_iter(vec![
                    SqlValue::Text(collection.partner_id.clone()),
                    Self::optional_text(collection.account_id.as_deref()),
                    SqlValue::Text(collection.watched_type.clone()),
                    Self::optional_text(collection.field_name.as_deref()),
                    SqlValue::Text(conditions),
                    SqlValue::Integer(id.get()),
                ]),
            )
            .await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("collection {id}")));
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("collection {id}")))
    }

    async fn save_sync_state(&self, collection: &Collection) -> Result<()> {
        let id = collection.require_id()?;

        let updated = self
            .conn
            .execute(
                "UPDATE collections SET last_commit_id = ?, last_sync = ?
                 WHERE id = ? AND last_commit_id <= ?",
                params_from_iter(vec![
                    SqlValue::Integer(collection.last_commit_id),
                    collection.last_sync.map_or(SqlValue::Null, SqlValue::Integer),
                    SqlValue::Integer(id.get()),
                    SqlValue::Integer(collection.last_commit_id),
                ]),
            )
            .await?;

        if updated == 0 {
            let Some(stored) = self.get(id).await? else {
                return Err(Error::NotFound(format!("collection {id}")));
            };
            tracing::error!(
                collection_id = %id,
                stored = stored.last_commit_id,
                requested = collection.last_commit_id,
                "Refusing to rewind collection watermark"
            );
            return Err(Error::InvariantViolation(format!(
                "collection {id} watermark would move back from {} to {}",
                stored.last_commit_id, collection.last_commit_id
            )));
        }
        Ok(())
    }

    async fn reset_sync_state(&self, collection: &Collection) -> Result<()> {
        let id = collection.require_id()?;

        let updated = self
            .conn
            .execute(
                "UPDATE collections SET last_commit_id = ?, last_sync = ? WHERE id = ?",
                params_from_iter(vec![
                    SqlValue::Integer(collection.last_commit_id),
                    collection.last_sync.map_or(SqlValue::Null, SqlValue::Integer),
                    SqlValue::Integer(id.get()),
                ]),
            )
            .await?;

        if updated == 0 {
            return Err(Error::NotFound(format!("collection {id}")));
        }
        tracing::warn!(
            collection_id = %id,
            watermark = collection.last_commit_id,
            "Reset collection watermark"
        );
        Ok(())
    }

    async fn delete(&self, id: CollectionId) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM collections WHERE id = ?", [id.get()])
            .await?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("collection {id}")));
        }

        tracing::info!(collection_id = %id, "Deleted collection; sync log rows remain until purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Operator;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn owned_tasks() -> Collection {
        Collection::new("phone-1", "acme", "task").with_conditions(vec![Condition::and(
            "owner",
            Operator::Eq,
            json!("U"),
        )])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_and_get() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        let created = repo.create(&owned_tasks()).await.unwrap();
        assert!(created.is_persisted());
        assert_eq!(created.revision, 1);

        let fetched = repo.get(created.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.conditions, owned_tasks().conditions);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_rejects_missing_partner() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        let collection = Collection::new(" ", "acme", "task");
        assert!(matches!(
            repo.create(&collection).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_by_partner() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        repo.create(&owned_tasks()).await.unwrap();
        repo.create(&Collection::new("phone-2", "acme", "task"))
            .await
            .unwrap();
        repo.create(&Collection::new("phone-1", "acme", "contact"))
            .await
            .unwrap();

        assert_eq!(repo.list(None).await.unwrap().len(), 3);
        let phone = repo.list(Some("phone-1")).await.unwrap();
        assert_eq!(phone.len(), 2);
        assert!(phone.iter().all(|c| c.partner_id == "phone-1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_definition_bumps_revision() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        let mut collection = repo.create(&owned_tasks()).await.unwrap();
        collection.conditions.clear();
        let updated = repo.update_definition(&collection).await.unwrap();

        assert_eq!(updated.revision, 2);
        assert!(updated.conditions.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_sync_state() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        let mut collection = repo.create(&owned_tasks()).await.unwrap();
        collection.last_commit_id = 42;
        collection.last_sync = Some(1_700_000_000_000);
        repo.save_sync_state(&collection).await.unwrap();

        let fetched = repo.get(collection.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(fetched.last_commit_id, 42);
        assert_eq!(fetched.last_sync, Some(1_700_000_000_000));
        assert_eq!(fetched.revision, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_sync_state_refuses_rewind() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        let mut collection = repo.create(&owned_tasks()).await.unwrap();
        collection.last_commit_id = 10;
        repo.save_sync_state(&collection).await.unwrap();

        collection.last_commit_id = 4;
        assert!(matches!(
            repo.save_sync_state(&collection).await,
            Err(Error::InvariantViolation(_))
        ));

        repo.reset_sync_state(&collection).await.unwrap();
        let fetched = repo.get(collection.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(fetched.last_commit_id, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_sync_state_requires_persisted_collection() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        assert!(matches!(
            repo.save_sync_state(&owned_tasks()).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete() {
        let db = setup().await;
        let repo = LibSqlCollectionRepository::new(db.connection());

        let collection = repo.create(&owned_tasks()).await.unwrap();
        let id = collection.id.unwrap();
        repo.delete(id).await.unwrap();

        assert!(repo.get(id).await.unwrap().is_none());
        assert!(matches!(repo.delete(id).await, Err(Error::NotFound(_))));
    }
}
