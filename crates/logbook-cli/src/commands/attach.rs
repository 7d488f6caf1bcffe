use std::path::Path;

use crate::commands::common::{resolve_record, sync_after_mutation, Workspace};
use crate::error::CliError;

pub async fn run_attach(
    id: &str,
    path: &Path,
    workspace: &Workspace,
    offline: bool,
) -> Result<(), CliError> {
    let store = workspace.open_store()?;
    let record = resolve_record(id, &store)?;
    let bytes = std::fs::read(path)?;

    let attachments = workspace.open_attachments()?;
    let updated = store.attach(&attachments, &record.local_id, bytes).await?;
    let size = updated
        .attachment
        .as_ref()
        .map_or(0, |attachment| attachment.size_bytes);
    println!("{} ({size} bytes)", updated.local_id);

    sync_after_mutation(workspace, &store, &attachments, offline).await;
    Ok(())
}
