use logbook_core::sync::{PullReport, PushReport, SyncReport};
use logbook_core::SyncTrigger;

use crate::cli::SyncCommands;
use crate::commands::common::Workspace;
use crate::error::CliError;

pub async fn run_sync(
    command: Option<SyncCommands>,
    watch: bool,
    workspace: &Workspace,
) -> Result<(), CliError> {
    let store = workspace.open_store()?;
    let attachments = workspace.open_attachments()?;
    let engine = workspace.open_engine(store, attachments)?;

    if watch {
        let interval = workspace.settings.auto_sync_interval;
        tracing::info!("Syncing every {}s; press Ctrl-C to stop", interval.as_secs());
        let task = engine.spawn_auto_sync(interval);
        tokio::signal::ctrl_c().await?;
        task.abort();
        println!("Stopped; last state: {}", engine.status());
        return Ok(());
    }

    match command {
        Some(SyncCommands::Push) => {
            let report = engine.retry_now().await;
            println!("{}", format_push_report(&report));
        }
        Some(SyncCommands::Pull) => {
            let report = engine.pull().await?;
            println!("{}", format_pull_report(&report));
        }
        None => {
            let report = engine.sync(SyncTrigger::UserAction).await;
            for line in format_sync_report(&report) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub fn format_push_report(report: &PushReport) -> String {
    let mut line = format!(
        "Pushed: {} created, {} updated, {} deleted",
        report.created, report.updated, report.deleted
    );
    if report.uploads.uploaded > 0 {
        line.push_str(&format!(", {} photo(s) uploaded", report.uploads.uploaded));
    }
    let waiting =
        report.failures() + report.still_pending + report.deferred + report.uploads.superseded;
    if waiting > 0 {
        line.push_str(&format!("; {waiting} waiting to retry"));
    }
    line
}

pub fn format_pull_report(report: &PullReport) -> String {
    format!(
        "Pulled {} entr{}: {} new, {} updated, {} kept local",
        report.fetched,
        if report.fetched == 1 { "y" } else { "ies" },
        report.merge.adopted,
        report.merge.remote_won,
        report.merge.local_won
    )
}

pub fn format_sync_report(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format_push_report(&report.push)];
    match &report.pull {
        Some(pull) => lines.push(format_pull_report(pull)),
        None => lines.push("Pull skipped: remote unavailable".to_string()),
    }
    lines.push(format!("Sync state: {}", report.state));
    lines
}
