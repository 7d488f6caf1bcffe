use serde::Serialize;

use crate::commands::common::Workspace;
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub data_dir: String,
    pub remote: Option<String>,
    pub entries: usize,
    pub pending: usize,
    pub pending_deletes: usize,
    pub pending_photos: usize,
}

pub fn collect_status(workspace: &Workspace) -> Result<StatusSummary, CliError> {
    let store = workspace.open_store()?;
    let snapshot = store.snapshot();

    Ok(StatusSummary {
        data_dir: workspace.data_dir.display().to_string(),
        remote: workspace.settings.api_base_url.clone(),
        entries: snapshot.iter().filter(|record| record.is_visible()).count(),
        pending: snapshot.iter().filter(|record| record.pending_sync).count(),
        pending_deletes: snapshot.iter().filter(|record| record.tombstoned).count(),
        pending_photos: snapshot
            .iter()
            .filter(|record| record.is_visible() && record.has_pending_upload())
            .count(),
    })
}

pub fn run_status(as_json: bool, workspace: &Workspace) -> Result<(), CliError> {
    let summary = collect_status(workspace)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Data directory: {}", summary.data_dir);
    println!(
        "Remote:         {}",
        summary.remote.as_deref().unwrap_or("not configured (local only)")
    );
    println!("Entries:        {}", summary.entries);
    println!(
        "Waiting:        {} change(s), {} delete(s), {} photo upload(s)",
        summary.pending, summary.pending_deletes, summary.pending_photos
    );
    Ok(())
}
