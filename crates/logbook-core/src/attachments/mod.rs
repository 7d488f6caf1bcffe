//! Attachment lifecycle: preparation, local caching, upload and retention.
//!
//! Each record owns at most one attachment. The prepared bytes are cached
//! under a key derived from the record's local id and stay there after a
//! successful upload, so they can be re-sent if the remote copy goes missing.

mod blob;
mod prepare;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use prepare::{prepare_image, PrepareOptions};

use std::sync::Arc;

use crate::models::{LocalId, Record};
use crate::remote::RemoteService;
use crate::{Error, Result};

/// MIME type of every prepared attachment.
pub const ATTACHMENT_MIME_TYPE: &str = "image/jpeg";

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Outcome of a [`AttachmentManager::retention_sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cached files deleted.
    pub deleted: usize,
    /// Old attachments kept because their record is not fully synced yet.
    pub retained_unsynced: usize,
}

#[derive(Clone)]
pub struct AttachmentManager {
    blobs: Arc<dyn BlobStore>,
    options: PrepareOptions,
}

impl std::fmt::Debug for AttachmentManager {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AttachmentManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AttachmentManager {
    pub fn new(blobs: Arc<dyn BlobStore>, options: PrepareOptions) -> Self {
        Self { blobs, options }
    }

    /// Manager over an in-memory blob store with default limits.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()), PrepareOptions::default())
    }

    #[must_use]
    pub const fn options(&self) -> PrepareOptions {
        self.options
    }

    /// Blob key of the cached attachment for `local_id`.
    #[must_use]
    pub fn cache_key(local_id: &LocalId) -> String {
        format!("{local_id}.jpg")
    }

    /// Resize and recompress raw image bytes below the configured ceiling.
    pub fn prepare(&self, raw_bytes: &[u8]) -> Result<Vec<u8>> {
        prepare_image(raw_bytes, self.options)
    }

    /// Write prepared bytes to the cache slot of `local_id`.
    pub fn cache_locally(&self, local_id: &LocalId, bytes: &[u8]) -> Result<()> {
        self.blobs.put(&Self::cache_key(local_id), bytes)
    }

    /// Whether a cached copy exists for `local_id`.
    pub fn is_cached(&self, local_id: &LocalId) -> Result<bool> {
        self.blobs.exists(&Self::cache_key(local_id))
    }

    pub fn cached_bytes(&self, local_id: &LocalId) -> Result<Option<Vec<u8>>> {
        self.blobs.get(&Self::cache_key(local_id))
    }

    /// Cached bytes for retrying an upload.
    pub fn recover_local_bytes(&self, record: &Record) -> Result<Option<Vec<u8>>> {
        self.cached_bytes(&record.local_id)
    }

    /// Drop the cached copy of a record that no longer exists.
    pub fn discard(&self, local_id: &LocalId) -> Result<bool> {
        self.blobs.delete(&Self::cache_key(local_id))
    }

    /// Send `bytes` to the remote and return the reference it assigned.
    ///
    /// The cached copy is kept.
    pub async fn upload(
        &self,
        remote: &dyn RemoteService,
        record: &Record,
        bytes: &[u8],
    ) -> Result<String> {
        let remote_id = record.remote_id.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!(
                "record {} has no remote id to attach to",
                record.local_id
            ))
        })?;
        let mime_type = record
            .attachment
            .as_ref()
            .map_or(ATTACHMENT_MIME_TYPE, |attachment| attachment.mime_type.as_str());

        let reference = remote.attach(remote_id, bytes, mime_type).await?;
        tracing::debug!(
            "Uploaded attachment for {} ({} bytes) as {}",
            record.local_id,
            bytes.len(),
            reference
        );
        Ok(reference)
    }

    /// Delete cached attachments that are safe to drop.
    ///
    /// A cached file goes only when its record has a remote id, the remote
    /// confirmed the attachment upload, and the record's `logged_at` is more
    /// than `max_age_days` before `now`. Anything not fully synced is kept
    /// regardless of age.
    pub fn retention_sweep(
        &self,
        records: &[Record],
        max_age_days: u32,
        now: i64,
    ) -> Result<SweepReport> {
        let cutoff = now.saturating_sub(i64::from(max_age_days).saturating_mul(DAY_MILLIS));
        let mut report = SweepReport::default();

        for record in records {
            let Some(attachment) = &record.attachment else {
                continue;
            };
            if record.fields.logged_at >= cutoff {
                continue;
            }
            if record.remote_id.is_none() || !attachment.is_uploaded() {
                if self.is_cached(&record.local_id)? {
                    report.retained_unsynced += 1;
                }
                continue;
            }
            if self.discard(&record.local_id)? {
                report.deleted += 1;
            }
        }

        if report.deleted > 0 || report.retained_unsynced > 0 {
            tracing::info!(
                "Attachment sweep deleted {} cached file(s), kept {} unsynced",
                report.deleted,
                report.retained_unsynced
            );
        }
        Ok(report)
    }
}
