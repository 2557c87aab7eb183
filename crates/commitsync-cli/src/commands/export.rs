use std::path::Path;

use commitsync_core::{ExportChange, ExportOptions, SyncService};

use crate::commands::common::{format_export_lines, parse_collection_id, parse_timestamp};
use crate::error::CliError;

pub async fn run_export(
    id: &str,
    no_fast_forward: bool,
    since: Option<&str>,
    as_json: bool,
    service: &SyncService,
) -> Result<(), CliError> {
    let id = parse_collection_id(id)?;
    let options = ExportOptions {
        auto_fast_forward: !no_fast_forward,
        limit_updates_after: since.map(parse_timestamp).transpose()?,
    };

    let changes = service.export_changed(id, options).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else if changes.is_empty() {
        println!("Up to date.");
    } else {
        for line in format_export_lines(&changes) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_ack(id: &str, changes_path: &Path, service: &SyncService) -> Result<(), CliError> {
    let id = parse_collection_id(id)?;
    let raw = std::fs::read_to_string(changes_path)?;
    let delivered: Vec<ExportChange> = serde_json::from_str(&raw)?;

    service.acknowledge_export(id, &delivered).await?;
    let collection = service.get_collection(id).await?;
    println!("@{}", collection.last_commit_id);
    Ok(())
}
