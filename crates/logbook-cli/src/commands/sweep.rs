use crate::commands::common::Workspace;
use crate::error::CliError;

pub async fn run_sweep(days: Option<u32>, workspace: &Workspace) -> Result<(), CliError> {
    let days = days.unwrap_or(workspace.settings.retention_days);
    let store = workspace.open_store()?;
    let attachments = workspace.open_attachments()?;

    let report = store.sweep_attachments(&attachments, days).await?;

    println!(
        "Removed {} cached photo(s); kept {} not yet synced",
        report.deleted, report.retained_unsynced
    );
    Ok(())
}
