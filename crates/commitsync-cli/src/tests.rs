use std::path::PathBuf;

use clap::Parser;
use commitsync_core::models::{ChangeAction, ExportChange, ImportChange};
use commitsync_core::{Collection, EngineConfig, EntityId, ExportOptions, SyncService, TypeRegistry};
use serde_json::json;

use crate::cli::{Cli, CollectionCommands, Commands, CompletionShell, EntityCommands};
use crate::commands::collection::run_collection;
use crate::commands::common::{
    build_registry, format_collection_lines, format_export_lines, format_import_lines,
    format_relative_time, parse_assignment, parse_collection_id, parse_conditions, parse_grouping,
    parse_timestamp, resolve_db_path,
};
use crate::commands::completions::run_completions;
use crate::commands::entity::run_entity;
use crate::commands::import::read_manifest;
use crate::error::CliError;

#[test]
fn parse_grouping_requires_all_parts() {
    assert_eq!(
        parse_grouping("task.list=task_list").unwrap(),
        ("task", "list", "task_list")
    );
    assert!(matches!(
        parse_grouping("task=task_list"),
        Err(CliError::InvalidGrouping(_))
    ));
    assert!(parse_grouping("task. =task_list").is_err());
}

#[test]
fn build_registry_resolves_grouping_namespace() {
    let registry = build_registry(&["task.list=task_list".to_string()]).unwrap();
    let source = registry.resolve("task", Some("list")).unwrap();
    assert_eq!(source.entity_type, "task_list");
    assert_eq!(registry.namespace_for("task_list"), source.namespace);
}

#[test]
fn parse_assignment_reads_json_or_text() {
    assert_eq!(
        parse_assignment("owner=\"U\"").unwrap(),
        ("owner".to_string(), json!("U"))
    );
    assert_eq!(
        parse_assignment("done=true").unwrap(),
        ("done".to_string(), json!(true))
    );
    assert_eq!(
        parse_assignment("title=buy milk").unwrap(),
        ("title".to_string(), json!("buy milk"))
    );
    assert!(matches!(
        parse_assignment("=1"),
        Err(CliError::InvalidAssignment(_))
    ));
    assert!(parse_assignment("novalue").is_err());
}

#[test]
fn parse_timestamp_accepts_millis_and_rfc3339() {
    assert_eq!(parse_timestamp("1700000000000").unwrap(), 1_700_000_000_000);
    assert_eq!(
        parse_timestamp("2023-11-14T22:13:20Z").unwrap(),
        1_700_000_000_000
    );
    assert!(matches!(
        parse_timestamp("yesterday"),
        Err(CliError::InvalidTimestamp(_))
    ));
}

#[test]
fn parse_collection_id_rejects_non_positive() {
    assert_eq!(parse_collection_id(" 7 ").unwrap().get(), 7);
    assert!(parse_collection_id("0").is_err());
    assert!(parse_collection_id("abc").is_err());
}

#[test]
fn parse_conditions_keeps_order() {
    let conditions =
        parse_conditions(&["and:owner:eq:\"U\"".to_string(), "or:done:is_null".to_string()])
            .unwrap();
    assert_eq!(conditions.len(), 2);
    assert_eq!(conditions[0].to_string(), "and:owner:eq:\"U\"");
    assert_eq!(conditions[1].to_string(), "or:done:is_null");

    assert!(parse_conditions(&["and:bad field:eq:1".to_string()]).is_err());
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn format_export_lines_marks_stale_deletes() {
    let lines = format_export_lines(&[
        ExportChange {
            id: EntityId::from("T2"),
            action: ChangeAction::Change,
            commit_id: Some(5),
        },
        ExportChange {
            id: EntityId::from("T1"),
            action: ChangeAction::Delete,
            commit_id: None,
        },
    ]);
    assert!(lines[0].starts_with("change"));
    assert!(lines[0].contains("@5"));
    assert!(lines[0].ends_with("T2"));
    assert!(lines[1].contains("stale"));
}

#[test]
fn format_import_lines_marks_new_objects() {
    let lines = format_import_lines(&[ImportChange {
        remote_id: "r-1".into(),
        remote_revision: "etag".into(),
        local_id: None,
        local_revision: 1,
        action: ChangeAction::Change,
    }]);
    assert_eq!(lines, vec!["change  r-1  rev etag  -> (new)".to_string()]);
}

#[test]
fn format_collection_lines_shows_source_and_watermark() {
    let collection = Collection::new("phone", "acme", "task")
        .with_field("list")
        .starting_at(12);
    let lines = format_collection_lines(&[collection]);
    assert!(lines[0].contains("phone"));
    assert!(lines[0].contains("task.list"));
    assert!(lines[0].contains("@12"));
    assert!(lines[0].ends_with("never"));
}

#[test]
fn resolve_db_path_prefers_flag() {
    let explicit = PathBuf::from("/tmp/explicit.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
}

#[test]
fn read_manifest_parses_pairs() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("manifest.json");
    std::fs::write(
        &path,
        r#"[{"remote_id": "r-1", "remote_revision": "a"}, {"remote_id": "r-2", "remote_revision": "b"}]"#,
    )
    .unwrap();
    let manifest = read_manifest(&path).unwrap();
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest[1].remote_revision, "b");

    std::fs::write(&path, r#"{"remote_id": "r-1"}"#).unwrap();
    assert!(matches!(
        read_manifest(&path),
        Err(CliError::InvalidManifest { .. })
    ));
}

#[test]
fn cli_parses_collection_create() {
    let cli = Cli::try_parse_from([
        "commitsync",
        "--grouping",
        "task.list=task_list",
        "collection",
        "create",
        "--partner",
        "phone",
        "--account",
        "acme",
        "--type",
        "task",
        "--where",
        "and:owner:eq:\"U\"",
    ])
    .unwrap();

    assert_eq!(cli.groupings, vec!["task.list=task_list".to_string()]);
    let Commands::Collection {
        command: CollectionCommands::Create {
            watched_type,
            conditions,
            skip_history,
            ..
        },
    } = cli.command
    else {
        panic!("expected collection create");
    };
    assert_eq!(watched_type, "task");
    assert_eq!(conditions.len(), 1);
    assert!(!skip_history);
}

#[test]
fn cli_rejects_update_with_clear_and_conditions() {
    let result = Cli::try_parse_from([
        "commitsync",
        "collection",
        "update",
        "1",
        "--clear",
        "--where",
        "and:owner:eq:U",
    ]);
    assert!(result.is_err());
}

#[test]
fn completions_are_written_to_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("commitsync.bash");
    run_completions(CompletionShell::Bash, Some(&path)).unwrap();
    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.contains("commitsync"));
}

#[tokio::test(flavor = "multi_thread")]
async fn commands_drive_an_export() {
    let tmp = tempfile::tempdir().unwrap();
    let service = SyncService::open_path(
        tmp.path().join("commitsync.db"),
        TypeRegistry::new(),
        EngineConfig::default(),
    )
    .await
    .unwrap();

    run_collection(
        CollectionCommands::Create {
            partner: "phone".into(),
            account: "acme".into(),
            watched_type: "task".into(),
            field: None,
            conditions: vec!["and:owner:eq:\"U\"".into()],
            skip_history: false,
        },
        &service,
    )
    .await
    .unwrap();
    run_entity(
        EntityCommands::Put {
            entity_type: "task".into(),
            account: "acme".into(),
            id: Some("T1".into()),
            fields: vec!["owner=U".into(), "title=hello".into()],
        },
        &service,
    )
    .await
    .unwrap();

    let collections = service.list_collections(Some("phone")).await.unwrap();
    let id = collections[0].id.unwrap();
    let changes = service
        .export_changed(id, ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].id, EntityId::from("T1"));

    // Updating keeps existing fields and stamps a new commit
    run_entity(
        EntityCommands::Put {
            entity_type: "task".into(),
            account: "acme".into(),
            id: Some("T1".into()),
            fields: vec!["owner=V".into()],
        },
        &service,
    )
    .await
    .unwrap();
    let stored = service
        .get_entity("task", &EntityId::from("T1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.field("title"), Some(&json!("hello")));
    assert_eq!(stored.commit_id, Some(2));

    service.flush_logs().await.unwrap();
    let stale = service
        .export_changed(id, ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].action, ChangeAction::Delete);
    service.shutdown().await.unwrap();
}
