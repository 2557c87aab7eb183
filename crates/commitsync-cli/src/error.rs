use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] commitsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid collection id: {0}")]
    InvalidCollectionId(String),
    #[error("Invalid field assignment '{0}': expected name=value")]
    InvalidAssignment(String),
    #[error("Invalid grouping '{0}': expected type.field=grouping_type")]
    InvalidGrouping(String),
    #[error("Invalid timestamp '{0}': expected RFC 3339 or Unix milliseconds")]
    InvalidTimestamp(String),
    #[error("Manifest {path} is not a JSON list of remote_id/remote_revision pairs: {message}")]
    InvalidManifest { path: String, message: String },
}
