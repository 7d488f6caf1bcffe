use std::path::PathBuf;

use logbook_core::sync::{PullReport, PushReport};
use logbook_core::{RecordFields, RemoteId, SyncSettings};
use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};

use crate::commands::common::{
    default_editor, format_record_lines, format_relative_time, normalize_content,
    parse_attributes, parse_logged_at, record_preview, resolve_data_dir, resolve_record,
    Workspace,
};
use crate::commands::delete::run_delete;
use crate::commands::status::collect_status;
use crate::commands::sync::{format_pull_report, format_push_report};
use crate::error::CliError;

fn workspace() -> (TempDir, Workspace) {
    let dir = tempdir().unwrap();
    let workspace = Workspace::new(SyncSettings::default(), Some(dir.path().to_path_buf())).unwrap();
    (dir, workspace)
}

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
}

#[test]
fn normalize_content_keeps_multiline_text() {
    assert_eq!(
        normalize_content("line 1\nline 2\n"),
        Some("line 1\nline 2".to_string())
    );
}

#[test]
fn default_editor_is_defined() {
    assert!(!default_editor().is_empty());
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn data_dir_prefers_flag_then_environment() {
    let flag = PathBuf::from("/from/flag");
    let env = PathBuf::from("/from/env");

    assert_eq!(
        resolve_data_dir(Some(flag.clone()), Some(env.clone())).unwrap(),
        flag
    );
    assert_eq!(resolve_data_dir(None, Some(env.clone())).unwrap(), env);
}

#[test]
fn parse_attributes_accepts_pairs_and_rejects_garbage() {
    let parsed = parse_attributes(&["mood = good".to_string(), "place=home".to_string()]).unwrap();
    assert_eq!(parsed.get("mood").map(String::as_str), Some("good"));
    assert_eq!(parsed.get("place").map(String::as_str), Some("home"));

    assert!(matches!(
        parse_attributes(&["no-separator".to_string()]),
        Err(CliError::InvalidArgument(_))
    ));
    assert!(parse_attributes(&["=value".to_string()]).is_err());
}

#[test]
fn parse_logged_at_reads_rfc3339() {
    assert_eq!(parse_logged_at("1970-01-01T00:00:01Z").unwrap(), 1_000);
    assert!(matches!(
        parse_logged_at("yesterday"),
        Err(CliError::InvalidArgument(_))
    ));
}

#[test]
fn record_preview_truncates_first_line() {
    let record = logbook_core::Record::new(
        RecordFields::new("A very long   breakfast description\nsecond line"),
        0,
    );
    assert_eq!(record_preview(&record, 12), "A very lo...");
    assert_eq!(
        record_preview(&record, 80),
        "A very long breakfast description"
    );
}

#[test]
fn record_lines_show_markers() {
    let mut record =
        logbook_core::Record::new(RecordFields::new("Toast").category("breakfast").logged_at(0), 0);
    let lines = format_record_lines(&[record.clone()], 30_000);
    assert!(lines[0].contains("[breakfast]"));
    assert!(lines[0].contains("*unsynced"));

    record.pending_sync = false;
    let lines = format_record_lines(&[record], 30_000);
    assert!(!lines[0].contains("*unsynced"));
}

#[tokio::test]
async fn resolve_record_by_prefix_and_reports_ambiguity() {
    let (_dir, workspace) = workspace();
    let store = workspace.open_store().unwrap();
    let first = store.create(RecordFields::new("first")).await.unwrap();
    let second = store.create(RecordFields::new("second")).await.unwrap();

    let first_id = first.local_id.to_string();
    let second_id = second.local_id.to_string();
    let common = first_id
        .chars()
        .zip(second_id.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect::<String>();
    let unique_prefix = &first_id[..=common.len()];

    assert_eq!(
        resolve_record(unique_prefix, &store).unwrap().local_id,
        first.local_id
    );
    assert_eq!(
        resolve_record(&second_id, &store).unwrap().local_id,
        second.local_id
    );
    if !common.is_empty() {
        assert!(matches!(
            resolve_record(&common, &store),
            Err(CliError::AmbiguousRecordId(_))
        ));
    }
    assert!(matches!(
        resolve_record("zzzz", &store),
        Err(CliError::RecordNotFound(_))
    ));
    assert!(matches!(
        resolve_record("  ", &store),
        Err(CliError::EmptyRecordId)
    ));
}

#[tokio::test]
async fn delete_removes_unsynced_and_tombstones_synced_entries() {
    let (_dir, workspace) = workspace();
    let store = workspace.open_store().unwrap();
    let draft = store.create(RecordFields::new("draft")).await.unwrap();
    let synced = store.create(RecordFields::new("synced")).await.unwrap();
    store
        .mark_synced(&synced.local_id, Some(RemoteId::new("r1")), synced.revision)
        .await
        .unwrap();
    let attachments = workspace.open_attachments().unwrap();
    attachments.cache_locally(&draft.local_id, b"jpeg").unwrap();
    drop(store);

    run_delete(
        &[draft.local_id.to_string(), synced.local_id.to_string()],
        &workspace,
        true,
    )
    .await
    .unwrap();

    let reopened = workspace.open_store().unwrap();
    assert!(reopened.get(&draft.local_id).is_none());
    assert!(reopened.get(&synced.local_id).unwrap().tombstoned);
    assert!(!attachments.is_cached(&draft.local_id).unwrap());

    let status = collect_status(&workspace).unwrap();
    assert_eq!(status.entries, 0);
    assert_eq!(status.pending_deletes, 1);
    assert_eq!(status.remote, None);
}

#[test]
fn sync_requires_configured_remote() {
    let (_dir, workspace) = workspace();
    let store = workspace.open_store().unwrap();
    let attachments = workspace.open_attachments().unwrap();

    assert!(matches!(
        workspace.open_engine(store, attachments),
        Err(CliError::SyncNotConfigured)
    ));
}

#[test]
fn push_report_mentions_waiting_records() {
    let report = PushReport {
        created: 2,
        failed: 1,
        deferred: 1,
        ..PushReport::default()
    };
    assert_eq!(
        format_push_report(&report),
        "Pushed: 2 created, 0 updated, 0 deleted; 2 waiting to retry"
    );
    assert_eq!(
        format_pull_report(&PullReport {
            fetched: 1,
            ..PullReport::default()
        }),
        "Pulled 1 entry: 0 new, 0 updated, 0 kept local"
    );
}
