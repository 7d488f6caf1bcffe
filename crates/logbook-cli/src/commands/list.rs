use chrono::Utc;

use crate::commands::common::{format_record_lines, record_to_list_item, RecordListItem, Workspace};
use crate::error::CliError;

pub fn run_list(
    limit: usize,
    pending_only: bool,
    as_json: bool,
    workspace: &Workspace,
) -> Result<(), CliError> {
    let store = workspace.open_store()?;
    let records = store
        .list()
        .into_iter()
        .filter(|record| !pending_only || record.pending_sync)
        .take(limit)
        .collect::<Vec<_>>();

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No entries yet.");
    } else {
        for line in format_record_lines(&records, Utc::now().timestamp_millis()) {
            println!("{line}");
        }
    }

    Ok(())
}
