//! Database layer for commitsync

mod collection_repository;
mod commit_repository;
mod connection;
mod entity_repository;
mod migrations;
mod sync_log_repository;

pub use collection_repository::{CollectionRepository, LibSqlCollectionRepository};
pub use commit_repository::{CommitSequencer, LibSqlCommitSequencer};
pub use connection::Database;
pub use entity_repository::{EntityQuery, EntityStore, LibSqlEntityStore};
pub use sync_log_repository::{LibSqlSyncLogStore, PurgeReport, SyncLogStore};
