use std::collections::BTreeMap;
use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use logbook_core::{
    AttachmentManager, FsBlobStore, LocalStore, Record, SyncEngine, SyncSettings, SyncTrigger,
};
use serde::Serialize;

use crate::error::CliError;

const STORE_FILE_NAME: &str = "records.json";
const ATTACHMENTS_DIR_NAME: &str = "attachments";

/// Resolved settings plus the on-disk locations derived from them.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub settings: SyncSettings,
    pub data_dir: PathBuf,
}

impl Workspace {
    pub fn new(settings: SyncSettings, cli_data_dir: Option<PathBuf>) -> Result<Self, CliError> {
        let data_dir = resolve_data_dir(cli_data_dir, settings.data_dir.clone())?;
        Ok(Self { settings, data_dir })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join(ATTACHMENTS_DIR_NAME)
    }

    pub fn open_store(&self) -> Result<LocalStore, CliError> {
        Ok(LocalStore::open(self.store_path())?)
    }

    pub fn open_attachments(&self) -> Result<AttachmentManager, CliError> {
        let blobs = FsBlobStore::open(self.attachments_dir())?;
        Ok(AttachmentManager::new(
            Arc::new(blobs),
            self.settings.attachment,
        ))
    }

    /// Build a sync engine over `store`, failing when no remote is configured.
    pub fn open_engine(
        &self,
        store: LocalStore,
        attachments: AttachmentManager,
    ) -> Result<SyncEngine, CliError> {
        let Some(remote) = self.settings.remote_service()? else {
            return Err(CliError::SyncNotConfigured);
        };
        Ok(SyncEngine::with_policy(
            store,
            attachments,
            Arc::new(remote),
            self.settings.retry,
            Arc::new(logbook_core::clock::SystemClock),
        ))
    }
}

/// Push a just-committed change if a remote is configured.
///
/// Never fails the calling command; an unsynced change stays pending.
pub async fn sync_after_mutation(
    workspace: &Workspace,
    store: &LocalStore,
    attachments: &AttachmentManager,
    offline: bool,
) {
    if offline || !workspace.settings.is_remote_configured() {
        return;
    }
    match workspace.open_engine(store.clone(), attachments.clone()) {
        Ok(engine) => {
            let report = engine.sync(SyncTrigger::PostMutation).await;
            tracing::debug!("Post-mutation sync finished in state {}", report.state);
        }
        Err(error) => tracing::warn!("Skipping sync: {}", error),
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub preview: String,
    pub text: String,
    pub logged_at: i64,
    pub last_modified: i64,
    pub relative_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub remote_id: Option<String>,
    pub pending_sync: bool,
    pub has_photo: bool,
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.local_id.to_string(),
        preview: record_preview(record, 80),
        text: record.fields.text.clone(),
        logged_at: record.fields.logged_at,
        last_modified: record.last_modified,
        relative_time: format_relative_time(record.fields.logged_at, now_ms),
        category: record.fields.category.clone(),
        attributes: record.fields.attributes.clone(),
        remote_id: record.remote_id.as_ref().map(ToString::to_string),
        pending_sync: record.pending_sync,
        has_photo: record.attachment.is_some(),
    }
}

pub fn format_record_lines(records: &[Record], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let id = record.local_id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let preview = record_preview(record, 40);
            let relative_time = format_relative_time(record.fields.logged_at, now_ms);
            let markers = render_markers(record);

            if markers.is_empty() {
                format!("{short_id:<13}  {preview:<40}  {relative_time}")
            } else {
                format!("{short_id:<13}  {preview:<40}  {relative_time:<10}  {markers}")
            }
        })
        .collect()
}

fn render_markers(record: &Record) -> String {
    let mut markers = Vec::new();
    if let Some(category) = &record.fields.category {
        markers.push(format!("[{category}]"));
    }
    if record.attachment.is_some() {
        markers.push("+photo".to_string());
    }
    if record.pending_sync {
        markers.push("*unsynced".to_string());
    }
    markers.join(" ")
}

pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let first_line = record.fields.text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Find a visible record by full ID or unique ID prefix.
pub fn resolve_record(query: &str, store: &LocalStore) -> Result<Record, CliError> {
    let query = normalize_record_identifier(query)?;

    if let Ok(local_id) = query.parse() {
        if let Some(record) = store.get(&local_id).filter(Record::is_visible) {
            return Ok(record);
        }
    }

    let mut matching = store
        .list()
        .into_iter()
        .filter(|record| record.local_id.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::RecordNotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|record| record.local_id.to_string().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Parse an RFC 3339 timestamp into Unix milliseconds.
pub fn parse_logged_at(raw: &str) -> Result<i64, CliError> {
    chrono::DateTime::parse_from_rfc3339(raw.trim())
        .map(|date_time| date_time.timestamp_millis())
        .map_err(|error| CliError::InvalidArgument(format!("--at '{raw}': {error}")))
}

/// Parse repeated `key=value` arguments.
pub fn parse_attributes(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .map(|(key, value)| (key.trim(), value.trim()))
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| {
                    CliError::InvalidArgument(format!("attribute '{pair}' must be KEY=VALUE"))
                })?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

pub fn resolve_entry_text(text_parts: &[String]) -> Result<String, CliError> {
    if let Some(text) = normalize_content(&text_parts.join(" ")) {
        return Ok(text);
    }

    if let Some(text) = read_piped_stdin()? {
        return Ok(text);
    }

    if let Some(text) = capture_editor_input_with_initial("")? {
        return Ok(text);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_entry_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(CliError::EditorFailed("empty EDITOR command".into()));
    };

    let status = Command::new(program).args(parts).arg(file_path).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_entry_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("logbook-entry-{}-{now}.md", std::process::id()))
}

/// `--data-dir`, then `LOGBOOK_DATA_DIR`, then the platform data directory.
pub fn resolve_data_dir(
    cli_data_dir: Option<PathBuf>,
    configured: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    if let Some(dir) = cli_data_dir.or(configured) {
        return Ok(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("logbook"))
        .ok_or_else(|| CliError::Config("Failed to resolve a data directory; pass --data-dir".into()))
}
