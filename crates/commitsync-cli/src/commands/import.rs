use std::path::Path;

use commitsync_core::{ManifestEntry, SyncService};

use crate::commands::common::{format_import_lines, parse_collection_id};
use crate::error::CliError;

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>, CliError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|error| CliError::InvalidManifest {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

pub async fn run_import(
    id: &str,
    manifest_path: &Path,
    as_json: bool,
    service: &SyncService,
) -> Result<(), CliError> {
    let id = parse_collection_id(id)?;
    let manifest = read_manifest(manifest_path)?;

    let changes = service.import_changed(id, &manifest).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else if changes.is_empty() {
        println!("In sync.");
    } else {
        for line in format_import_lines(&changes) {
            println!("{line}");
        }
    }
    Ok(())
}
