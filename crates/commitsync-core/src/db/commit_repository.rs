//! Commit sequencer backed by one atomic counter row per namespace

use crate::error::{Error, Result};
use libsql::Connection;

/// Per-namespace monotonically increasing commit counter
#[allow(async_fn_in_trait)]
pub trait CommitSequencer {
    /// Most recently allocated commit, 0 if the namespace never advanced
    async fn head_commit(&self, namespace: &str) -> Result<i64>;

    /// Allocate and return the next commit of the namespace
    async fn advance(&self, namespace: &str) -> Result<i64>;
}

/// libSQL implementation of `CommitSequencer`
pub struct LibSqlCommitSequencer<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCommitSequencer<'a> {
    /// Create a new sequencer with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl CommitSequencer for LibSqlCommitSequencer<'_> {
    async fn head_commit(&self, namespace: &str) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT head FROM commit_heads WHERE namespace = ?",
                [namespace],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(row.get::<i64>(0)?)
        } else {
            Ok(0)
        }
    }

    async fn advance(&self, namespace: &str) -> Result<i64> {
        // Single statement: increment-and-return is atomic per namespace
        let mut rows = self
            .conn
            .query(
                "INSERT INTO commit_heads (namespace, head) VALUES (?, 1)
                 ON CONFLICT(namespace) DO UPDATE SET head = head + 1
                 RETURNING head",
                [namespace],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database(format!("no head returned for {namespace}")))?;
        let head = row.get::<i64>(0)?;
        tracing::trace!(namespace, head, "Advanced commit head");
        Ok(head)
    }
}
