use crate::commands::common::{resolve_record, sync_after_mutation, Workspace};
use crate::error::CliError;

pub async fn run_delete(ids: &[String], workspace: &Workspace, offline: bool) -> Result<(), CliError> {
    let store = workspace.open_store()?;
    let local_ids = ids
        .iter()
        .map(|id| resolve_record(id, &store).map(|record| record.local_id))
        .collect::<Result<Vec<_>, _>>()?;

    let report = store.tombstone(&local_ids).await?;

    let attachments = workspace.open_attachments()?;
    for local_id in &report.removed {
        attachments.discard(local_id)?;
    }
    for local_id in report.tombstoned.iter().chain(&report.removed) {
        println!("{local_id}");
    }

    sync_after_mutation(workspace, &store, &attachments, offline).await;
    Ok(())
}
