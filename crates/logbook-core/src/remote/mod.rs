//! Remote record service boundary.
//!
//! The sync engine only talks to the authoritative collection through
//! [`RemoteService`]. Credentials and session establishment are external; an
//! authentication failure is just another transient error.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpRemoteService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{LocalId, RecordFields, RemoteId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote request failed: {0}")]
    Transport(String),
    #[error("Remote rejected credentials")]
    Unauthorized,
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Everything except a malformed payload is treated as transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidPayload(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Body of a create or update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub local_id: LocalId,
    pub fields: RecordFields,
    pub last_modified: i64,
}

/// A record as reported by the remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: RemoteId,
    pub local_id: LocalId,
    pub fields: RecordFields,
    pub last_modified: i64,
    #[serde(default)]
    pub attachment_ref: Option<String>,
}

impl RemoteRecord {
    /// Check the invariants a record must satisfy before it may be merged.
    pub fn validate(&self) -> RemoteResult<()> {
        if self.remote_id.as_str().trim().is_empty() {
            return Err(RemoteError::InvalidPayload(format!(
                "record {} has an empty remote id",
                self.local_id
            )));
        }
        if self.last_modified < 0 {
            return Err(RemoteError::InvalidPayload(format!(
                "record {} has a negative last_modified",
                self.local_id
            )));
        }
        if self
            .attachment_ref
            .as_deref()
            .is_some_and(|reference| reference.trim().is_empty())
        {
            return Err(RemoteError::InvalidPayload(format!(
                "record {} has an empty attachment reference",
                self.local_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Restricts a remote listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only records modified strictly after this timestamp (Unix ms).
    pub modified_since: Option<i64>,
}

/// CRUD service holding the authoritative record collection.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create a record and return the identifier the remote assigned.
    async fn create(&self, payload: &RecordPayload) -> RemoteResult<RemoteId>;

    /// Overwrite an existing record.
    async fn update(&self, remote_id: &RemoteId, payload: &RecordPayload) -> RemoteResult<()>;

    /// Delete a record; a missing record is reported, not treated as an error.
    async fn delete(&self, remote_id: &RemoteId) -> RemoteResult<DeleteOutcome>;

    /// Fetch a snapshot of the collection.
    async fn list(&self, filter: &ListFilter) -> RemoteResult<Vec<RemoteRecord>>;

    /// Attach binary bytes to a record and return the attachment reference.
    async fn attach(&self, remote_id: &RemoteId, bytes: &[u8], mime_type: &str)
        -> RemoteResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_record() -> RemoteRecord {
        RemoteRecord {
            remote_id: RemoteId::new("r1"),
            local_id: LocalId::new(),
            fields: RecordFields::new("Soup").logged_at(10),
            last_modified: 10,
            attachment_ref: None,
        }
    }

    #[test]
    fn validate_accepts_well_formed_record() {
        assert!(remote_record().validate().is_ok());
    }

    #[test]
    fn validate_rejects_malformed_records() {
        let mut empty_id = remote_record();
        empty_id.remote_id = RemoteId::new(" ");
        assert!(matches!(
            empty_id.validate(),
            Err(RemoteError::InvalidPayload(_))
        ));

        let mut negative = remote_record();
        negative.last_modified = -1;
        assert!(negative.validate().is_err());

        let mut empty_attachment = remote_record();
        empty_attachment.attachment_ref = Some(String::new());
        assert!(empty_attachment.validate().is_err());
    }

    #[test]
    fn only_invalid_payload_is_permanent() {
        assert!(RemoteError::Unauthorized.is_transient());
        assert!(RemoteError::Transport("timeout".to_string()).is_transient());
        assert!(RemoteError::Api {
            status: 503,
            message: "busy".to_string()
        }
        .is_transient());
        assert!(!RemoteError::InvalidPayload("bad".to_string()).is_transient());
    }
}
