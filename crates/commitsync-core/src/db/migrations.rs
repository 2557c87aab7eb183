//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run a migration's statements in one transaction
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: commit heads, entities and collections
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // One atomically incremented counter per namespace
            "CREATE TABLE IF NOT EXISTS commit_heads (
                namespace TEXT PRIMARY KEY,
                head INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                account_id TEXT NOT NULL,
                fields TEXT NOT NULL DEFAULT '{}',
                commit_id INTEGER,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_entities_commit
                ON entities(entity_type, account_id, commit_id)",
            "CREATE INDEX IF NOT EXISTS idx_entities_updated
                ON entities(entity_type, account_id, updated_at)",
            "CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                partner_id TEXT NOT NULL,
                account_id TEXT,
                watched_type TEXT NOT NULL,
                field_name TEXT,
                conditions TEXT NOT NULL DEFAULT '[]',
                last_commit_id INTEGER NOT NULL DEFAULT 0,
                last_sync INTEGER,
                revision INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_collections_partner ON collections(partner_id)",
        ],
    )
    .await
}

/// Migration to version 2: export and import sync logs
///
/// No foreign keys to `collections`: deleting a collection leaves its rows
/// behind until a maintenance purge.
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS sync_export_log (
                collection_id INTEGER NOT NULL,
                unique_id TEXT NOT NULL,
                commit_id INTEGER,
                logged_at INTEGER NOT NULL,
                PRIMARY KEY (collection_id, unique_id)
            )",
            "CREATE TABLE IF NOT EXISTS sync_import_log (
                collection_id INTEGER NOT NULL,
                remote_id TEXT NOT NULL,
                remote_revision TEXT NOT NULL,
                local_id TEXT,
                local_revision INTEGER,
                logged_at INTEGER NOT NULL,
                PRIMARY KEY (collection_id, remote_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_import_log_local
                ON sync_import_log(collection_id, local_id)",
        ],
    )
    .await
}
