//! Record model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::attachment::AttachmentRef;

/// Client-generated identifier for a record, using UUID v7 (time-sortable).
///
/// Exists before the record has any remote identity and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Create a new unique local ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-assigned identifier, present once the remote accepted a create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Domain payload of a logged entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    /// Free text entered by the user
    pub text: String,
    /// When the logged event happened (Unix ms), chosen by the user
    pub logged_at: i64,
    /// Categorical attribute such as the meal kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Additional categorical attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl RecordFields {
    /// Fields with the given text, logged now.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            logged_at: crate::util::now_millis(),
            category: None,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn logged_at(mut self, logged_at: i64) -> Self {
        self.logged_at = logged_at;
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get first line as a preview, truncated to `max_len` characters
    #[must_use]
    pub fn preview(&self, max_len: usize) -> String {
        self.text
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

/// A user-authored unit of logged data tracked by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub local_id: LocalId,
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
    pub fields: RecordFields,
    #[serde(default)]
    pub attachment: Option<AttachmentRef>,
    /// Timestamp of the most recent accepted writer (Unix ms)
    pub last_modified: i64,
    /// Local state not yet confirmed by the remote service
    pub pending_sync: bool,
    /// Delete requested locally, not yet confirmed remotely
    #[serde(default)]
    pub tombstoned: bool,
    /// Attempt token bumped by every local mutation
    #[serde(default)]
    pub revision: u64,
}

impl Record {
    /// Create a new, never-synced record.
    #[must_use]
    pub fn new(fields: RecordFields, now: i64) -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: None,
            fields,
            attachment: None,
            last_modified: now,
            pending_sync: true,
            tombstoned: false,
            revision: 1,
        }
    }

    /// Whether the record shows up in user-facing listings.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        !self.tombstoned
    }

    /// Whether the attachment exists locally but the remote has not confirmed it.
    #[must_use]
    pub fn has_pending_upload(&self) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|attachment| !attachment.is_uploaded())
    }

    /// Record a local write: bump `last_modified` monotonically, mark dirty
    /// and issue a new revision.
    pub fn touch(&mut self, now: i64) {
        self.last_modified = now.max(self.last_modified.saturating_add(1));
        self.pending_sync = true;
        self.revision = self.revision.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_unique() {
        let id1 = LocalId::new();
        let id2 = LocalId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_local_id_parse() {
        let id = LocalId::new();
        let parsed: LocalId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_record_new_is_pending() {
        let record = Record::new(RecordFields::new("Oatmeal"), 1_000);
        assert!(record.pending_sync);
        assert!(!record.tombstoned);
        assert!(record.remote_id.is_none());
        assert_eq!(record.last_modified, 1_000);
    }

    #[test]
    fn test_touch_is_monotonic_under_clock_skew() {
        let mut record = Record::new(RecordFields::new("Lunch"), 5_000);
        record.pending_sync = false;
        let revision = record.revision;

        record.touch(4_000);

        assert_eq!(record.last_modified, 5_001);
        assert!(record.pending_sync);
        assert_eq!(record.revision, revision + 1);
    }

    #[test]
    fn test_fields_preview() {
        let fields = RecordFields::new("Pasta with pesto\nextra cheese");
        assert_eq!(fields.preview(50), "Pasta with pesto");
        assert_eq!(fields.preview(5), "Pasta");
    }

    #[test]
    fn test_record_deserializes_without_optional_fields() {
        let id = LocalId::new();
        let json = format!(
            r#"{{"local_id":"{id}","fields":{{"text":"tea","logged_at":7}},"last_modified":9,"pending_sync":false}}"#
        );
        let record: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(record.local_id, id);
        assert!(record.remote_id.is_none());
        assert!(record.attachment.is_none());
        assert!(!record.tombstoned);
        assert_eq!(record.revision, 0);
    }
}
