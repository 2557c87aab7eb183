use commitsync_core::SyncService;

use crate::cli::MaintenanceCommands;
use crate::error::CliError;

pub async fn run_maintenance(
    command: MaintenanceCommands,
    service: &SyncService,
) -> Result<(), CliError> {
    match command {
        MaintenanceCommands::PurgeLogs => {
            let report = service.purge_sync_logs().await?;
            println!(
                "Removed {} export and {} import log rows",
                report.exported, report.imported
            );
        }
    }
    Ok(())
}
