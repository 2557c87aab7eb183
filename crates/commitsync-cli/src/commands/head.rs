use commitsync_core::SyncService;

use crate::error::CliError;

pub async fn run_head(
    watched_type: &str,
    field: Option<&str>,
    service: &SyncService,
) -> Result<(), CliError> {
    let head = service.head_commit(watched_type, field).await?;
    println!("{head}");
    Ok(())
}
