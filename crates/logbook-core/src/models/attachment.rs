//! Attachment reference model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pointer to the (at most one) binary payload of a record.
///
/// The bytes themselves live in the attachment cache keyed by the owning
/// record's local id; this only tracks what is known about them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Reference assigned by the remote service after a confirmed upload.
    #[serde(default)]
    pub remote_ref: Option<String>,
    /// Content MIME type.
    pub mime_type: String,
    /// Size of the prepared payload in bytes.
    pub size_bytes: u64,
    /// Identifies which locally attached payload this is; an upload is only
    /// confirmed for the revision it sent.
    #[serde(default)]
    pub revision: u64,
}

impl AttachmentRef {
    /// Reference for prepared bytes that have not been uploaded yet.
    pub fn pending(mime_type: impl Into<String>, size_bytes: u64) -> Result<Self> {
        let mime_type = mime_type.into().trim().to_string();
        if mime_type.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment mime_type cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            remote_ref: None,
            mime_type,
            size_bytes,
            revision: 0,
        })
    }

    /// Reference known only from the remote side.
    #[must_use]
    pub fn uploaded(remote_ref: impl Into<String>) -> Self {
        Self {
            remote_ref: Some(remote_ref.into()),
            mime_type: "image/jpeg".to_string(),
            size_bytes: 0,
            revision: 0,
        }
    }

    #[must_use]
    pub const fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Whether the remote service confirmed the upload.
    #[must_use]
    pub const fn is_uploaded(&self) -> bool {
        self.remote_ref.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_attachment_is_not_uploaded() {
        let attachment = AttachmentRef::pending("image/jpeg", 1234).unwrap();
        assert!(!attachment.is_uploaded());
        assert_eq!(attachment.size_bytes, 1234);
    }

    #[test]
    fn test_uploaded_attachment() {
        let attachment = AttachmentRef::uploaded("photos/abc.jpg");
        assert!(attachment.is_uploaded());
        assert_eq!(attachment.remote_ref.as_deref(), Some("photos/abc.jpg"));
    }

    #[test]
    fn test_attachment_validation() {
        assert!(AttachmentRef::pending("  ", 1).is_err());
    }
}
