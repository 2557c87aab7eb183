//! commitsync-core - Commit-log entity synchronization
//!
//! This crate contains the entity store, commit sequencer, sync logs and the
//! export/import diff engine used by partner-facing sync endpoints and the
//! `commitsync` CLI.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod registry;
pub mod services;
pub mod sync;
pub mod util;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::{
    ChangeAction, Collection, CollectionId, Condition, Entity, EntityId, ExportChange,
    ImportChange, ManifestEntry,
};
pub use registry::TypeRegistry;
pub use services::SyncService;
pub use sync::{diff_import, ExportOptions, SyncEngine};
