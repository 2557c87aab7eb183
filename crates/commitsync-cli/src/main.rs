//! commitsync CLI - Administer commit-log sync collections
//!
//! Create partner collections, run export and import diffs by hand, inspect
//! commit heads and run maintenance against a local database.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::collection::run_collection;
use crate::commands::common::{open_service, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::entity::run_entity;
use crate::commands::export::{run_ack, run_export};
use crate::commands::head::run_head;
use crate::commands::import::run_import;
use crate::commands::maintenance::run_maintenance;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path);
    let service = open_service(&db_path, cli.config.as_deref(), &cli.groupings).await?;
    tracing::debug!(db_path = %db_path.display(), "Opened sync database");

    let result = match cli.command {
        Commands::Collection { command } => run_collection(command, &service).await,
        Commands::Export {
            id,
            no_fast_forward,
            since,
            json,
        } => run_export(&id, no_fast_forward, since.as_deref(), json, &service).await,
        Commands::Ack { id, changes } => run_ack(&id, &changes, &service).await,
        Commands::Import { id, manifest, json } => {
            run_import(&id, &manifest, json, &service).await
        }
        Commands::Entity { command } => run_entity(command, &service).await,
        Commands::Head {
            watched_type,
            field,
        } => run_head(&watched_type, field.as_deref(), &service).await,
        Commands::Maintenance { command } => run_maintenance(command, &service).await,
        Commands::Completions { .. } => Ok(()),
    };

    // Queued log writes must land before the process exits
    service.flush_logs().await?;
    let failed = service.failed_log_writes();
    if failed > 0 {
        tracing::warn!(failed, "Some sync log writes were dropped");
    }
    service.shutdown().await?;
    result
}
