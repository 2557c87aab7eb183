use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use commitsync_core::models::{ChangeAction, ExportChange, ImportChange};
use commitsync_core::{Collection, CollectionId, Condition, EngineConfig, SyncService, TypeRegistry};
use serde_json::Value;

use crate::error::CliError;

pub const ENV_DB_PATH: &str = "COMMITSYNC_DB_PATH";

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("commitsync")
        .join("commitsync.db")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("commitsync")
        .join("config.json")
}

/// Engine config from file (explicit or default location), then environment
pub fn load_engine_config(config_path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let path = config_path.map_or_else(default_config_path, Path::to_path_buf);
    Ok(EngineConfig::load_from_path(&path)?.with_env_overrides()?)
}

pub fn build_registry(groupings: &[String]) -> Result<TypeRegistry, CliError> {
    let mut registry = TypeRegistry::new();
    for raw in groupings {
        let (watched_type, field_name, grouping_type) = parse_grouping(raw)?;
        registry.register_grouping(watched_type, field_name, grouping_type);
    }
    Ok(registry)
}

/// Parse `type.field=grouping_type`
pub fn parse_grouping(raw: &str) -> Result<(&str, &str, &str), CliError> {
    let invalid = || CliError::InvalidGrouping(raw.to_string());
    let (source, grouping_type) = raw.split_once('=').ok_or_else(invalid)?;
    let (watched_type, field_name) = source.split_once('.').ok_or_else(invalid)?;

    let parts = [watched_type.trim(), field_name.trim(), grouping_type.trim()];
    if parts.iter().any(|part| part.is_empty()) {
        return Err(invalid());
    }
    Ok((parts[0], parts[1], parts[2]))
}

pub async fn open_service(
    db_path: &Path,
    config_path: Option<&Path>,
    groupings: &[String],
) -> Result<SyncService, CliError> {
    let config = load_engine_config(config_path)?;
    let registry = build_registry(groupings)?;
    Ok(SyncService::open_path(db_path.to_path_buf(), registry, config).await?)
}

pub fn parse_collection_id(raw: &str) -> Result<CollectionId, CliError> {
    raw.trim()
        .parse::<CollectionId>()
        .map_err(|_| CliError::InvalidCollectionId(raw.to_string()))
}

pub fn parse_conditions(raw: &[String]) -> Result<Vec<Condition>, CliError> {
    raw.iter()
        .map(|clause| clause.parse::<Condition>().map_err(CliError::from))
        .collect()
}

/// Parse `name=value`; the value is JSON when it parses, text otherwise
pub fn parse_assignment(raw: &str) -> Result<(String, Value), CliError> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidAssignment(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidAssignment(raw.to_string()));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// RFC 3339 or Unix milliseconds
pub fn parse_timestamp(raw: &str) -> Result<i64, CliError> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return Ok(millis);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|date_time| date_time.timestamp_millis())
        .map_err(|_| CliError::InvalidTimestamp(raw.to_string()))
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn collection_source(collection: &Collection) -> String {
    collection.field_name.as_deref().map_or_else(
        || collection.watched_type.clone(),
        |field| format!("{}.{field}", collection.watched_type),
    )
}

pub fn format_collection_lines(collections: &[Collection]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    collections
        .iter()
        .map(|collection| {
            let id = collection
                .id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let last_sync = collection
                .last_sync
                .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now_ms));
            format!(
                "{id:>5}  {:<16}  {:<20}  @{:<8}  {last_sync}",
                collection.partner_id,
                collection_source(collection),
                collection.last_commit_id,
            )
        })
        .collect()
}

pub fn format_collection_details(collection: &Collection) -> Vec<String> {
    let mut lines = vec![
        format!(
            "id:         {}",
            collection.id.map_or_else(|| "-".to_string(), |id| id.to_string())
        ),
        format!("partner:    {}", collection.partner_id),
        format!(
            "account:    {}",
            collection.account_id.as_deref().unwrap_or("-")
        ),
        format!("source:     {}", collection_source(collection)),
        format!("watermark:  {}", collection.last_commit_id),
        format!(
            "last sync:  {}",
            collection
                .last_sync
                .map_or_else(|| "never".to_string(), format_sync_timestamp)
        ),
        format!("revision:   {}", collection.revision),
    ];
    if collection.conditions.is_empty() {
        lines.push("conditions: (none)".to_string());
    } else {
        lines.push("conditions:".to_string());
        lines.extend(
            collection
                .conditions
                .iter()
                .map(|condition| format!("  {condition}")),
        );
    }
    lines
}

const fn action_label(action: ChangeAction) -> &'static str {
    match action {
        ChangeAction::Change => "change",
        ChangeAction::Delete => "delete",
    }
}

pub fn format_export_lines(changes: &[ExportChange]) -> Vec<String> {
    changes
        .iter()
        .map(|change| {
            let commit = change
                .commit_id
                .map_or_else(|| "stale".to_string(), |commit| format!("@{commit}"));
            format!("{:<6}  {:<8}  {}", action_label(change.action), commit, change.id)
        })
        .collect()
}

pub fn format_import_lines(changes: &[ImportChange]) -> Vec<String> {
    changes
        .iter()
        .map(|change| {
            let local = change
                .local_id
                .as_ref()
                .map_or_else(|| "(new)".to_string(), ToString::to_string);
            format!(
                "{:<6}  {}  rev {}  -> {local}",
                action_label(change.action),
                change.remote_id,
                change.remote_revision,
            )
        })
        .collect()
}
