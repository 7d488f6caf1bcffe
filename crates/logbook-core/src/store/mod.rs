//! Durable client-side record cache.
//!
//! [`LocalStore`] is the only thing the UI reads. All mutations go through a
//! single async mutex; each one works on a copy of the committed collection,
//! persists it, and only then publishes it as the new immutable [`Snapshot`].
//! A failed write therefore leaves both disk and memory at the previous state.
//!
//! Cached attachment bytes are keyed by record only, so every write or
//! removal of them that depends on record state happens under a second lock
//! shared with [`LocalStore::attach`].

mod merge;
mod persist;

pub use merge::MergeReport;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use tokio::sync::{watch, Mutex};

use crate::attachments::{AttachmentManager, SweepReport, ATTACHMENT_MIME_TYPE};
use crate::clock::{Clock, SystemClock};
use crate::models::{AttachmentRef, LocalId, Record, RecordFields, RemoteId};
use crate::remote::RemoteRecord;
use crate::{Error, Result};

/// Immutable view of the collection as of the last committed mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: BTreeMap<LocalId, Record>,
}

impl Snapshot {
    #[must_use]
    pub fn get(&self, local_id: &LocalId) -> Option<&Record> {
        self.records.get(local_id)
    }

    /// All records, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Non-tombstoned records, newest logged entry first.
    #[must_use]
    pub fn visible(&self) -> Vec<Record> {
        let mut records = self
            .records
            .values()
            .filter(|record| record.is_visible())
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| {
            b.fields
                .logged_at
                .cmp(&a.fields.logged_at)
                .then(b.last_modified.cmp(&a.last_modified))
        });
        records
    }

    /// Records whose local state is not yet confirmed by the remote.
    #[must_use]
    pub fn pending(&self) -> Vec<Record> {
        self.records
            .values()
            .filter(|record| record.pending_sync)
            .cloned()
            .collect()
    }
}

/// Result of a batch [`LocalStore::tombstone`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TombstoneReport {
    /// Records marked for remote deletion.
    pub tombstoned: Vec<LocalId>,
    /// Never-synced records removed outright.
    pub removed: Vec<LocalId>,
}

/// Result of [`LocalStore::mark_synced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSynced {
    /// The pushed revision is current; the record is clean.
    Synced,
    /// The record changed while the push was in flight and stays pending.
    StillPending,
}

/// An attachment waiting for upload, read together with its cached bytes.
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub record: Record,
    /// `None` when the cached copy is gone.
    pub bytes: Option<Vec<u8>>,
}

/// Cheaply cloneable handle to the store.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    committed: Mutex<BTreeMap<LocalId, Record>>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    /// Records whose remote create has been sent but not yet acknowledged.
    creating: std::sync::Mutex<HashSet<LocalId>>,
    attachment_lock: Mutex<()>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LocalStore")
            .field("path", &self.inner.path)
            .field("records", &self.snapshot().len())
            .finish()
    }
}

impl LocalStore {
    /// Open the store persisted at `path`, creating it on first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let records = persist::load(&path)?;
        tracing::debug!(
            "Opened record store at {} with {} record(s)",
            path.display(),
            records.len()
        );
        Ok(Self::from_parts(Some(path), records, clock))
    }

    /// A store that keeps everything in memory (primarily for tests).
    pub fn open_in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(None, BTreeMap::new(), clock)
    }

    fn from_parts(
        path: Option<PathBuf>,
        records: BTreeMap<LocalId, Record>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let snapshot = Arc::new(Snapshot {
            records: records.clone(),
        });
        let (sender, _receiver) = watch::channel(snapshot);
        Self {
            inner: Arc::new(Inner {
                path,
                clock,
                committed: Mutex::new(records),
                snapshot: sender,
                creating: std::sync::Mutex::new(HashSet::new()),
                attachment_lock: Mutex::new(()),
            }),
        }
    }

    /// Location of the persisted collection, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// The last committed state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// Receive every newly committed snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot.subscribe()
    }

    #[must_use]
    pub fn get(&self, local_id: &LocalId) -> Option<Record> {
        self.snapshot().get(local_id).cloned()
    }

    /// Visible records ordered by `logged_at`, then `last_modified`, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<Record> {
        self.snapshot().visible()
    }

    /// Records awaiting confirmation from the remote.
    #[must_use]
    pub fn pending(&self) -> Vec<Record> {
        self.snapshot().pending()
    }

    /// Mark `local_id` as having a remote create in flight until the guard
    /// is dropped. Deleting such a record leaves a tombstone instead of
    /// removing it, so the delete is not lost when the create lands.
    pub(crate) fn begin_create(&self, local_id: LocalId) -> CreateGuard {
        self.creating().insert(local_id);
        CreateGuard {
            store: self.clone(),
            local_id,
        }
    }

    fn creating(&self) -> std::sync::MutexGuard<'_, HashSet<LocalId>> {
        self.inner
            .creating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `mutation` against a copy of the collection, persist the copy if
    /// the mutation reports a change, then commit and publish it.
    async fn mutate<T>(
        &self,
        mutation: impl FnOnce(&mut BTreeMap<LocalId, Record>, i64) -> Result<(T, bool)>,
    ) -> Result<T> {
        let mut committed = self.inner.committed.lock().await;
        let mut working = committed.clone();
        let (value, changed) = mutation(&mut working, self.now())?;

        if changed {
            if let Some(path) = &self.inner.path {
                persist::save(path, &working)?;
            }
            let snapshot = Arc::new(Snapshot {
                records: working.clone(),
            });
            *committed = working;
            self.inner.snapshot.send_replace(snapshot);
        }

        Ok(value)
    }

    /// Create a new record that has never been synced.
    pub async fn create(&self, fields: RecordFields) -> Result<Record> {
        self.mutate(|records, now| {
            let record = Record::new(fields, now);
            records.insert(record.local_id, record.clone());
            tracing::debug!("Created record {}", record.local_id);
            Ok((record, true))
        })
        .await
    }

    /// Replace the fields of a live record.
    pub async fn update(&self, local_id: &LocalId, fields: RecordFields) -> Result<Record> {
        self.mutate(|records, now| {
            let record = live_record_mut(records, local_id)?;
            record.fields = fields;
            record.touch(now);
            Ok((record.clone(), true))
        })
        .await
    }

    /// Request deletion of the given records.
    ///
    /// Records the remote has seen, or is being sent right now, are
    /// tombstoned until the remote confirms the delete; records it never saw
    /// are removed immediately. Already tombstoned or unknown ids are skipped.
    /// The batch is persisted once.
    pub async fn tombstone(&self, local_ids: &[LocalId]) -> Result<TombstoneReport> {
        self.mutate(|records, now| {
            let creating = self.creating();
            let mut report = TombstoneReport::default();
            for local_id in local_ids {
                let Some(record) = records.get_mut(local_id) else {
                    continue;
                };
                if record.tombstoned {
                    continue;
                }
                if record.remote_id.is_some() || creating.contains(local_id) {
                    record.tombstoned = true;
                    record.touch(now);
                    report.tombstoned.push(*local_id);
                } else {
                    records.remove(local_id);
                    report.removed.push(*local_id);
                }
            }
            let changed = !report.tombstoned.is_empty() || !report.removed.is_empty();
            Ok((report, changed))
        })
        .await
    }

    /// Record that the remote accepted `revision` of a record.
    ///
    /// A newly assigned remote id is stored even if the record changed in the
    /// meantime; `pending_sync` is cleared only when `revision` is still the
    /// record's current revision.
    pub async fn mark_synced(
        &self,
        local_id: &LocalId,
        assigned_remote_id: Option<RemoteId>,
        revision: u64,
    ) -> Result<MarkSynced> {
        self.mutate(|records, _now| {
            let record = records
                .get_mut(local_id)
                .ok_or_else(|| Error::NotFound(local_id.to_string()))?;
            let mut changed = false;

            if let Some(assigned) = assigned_remote_id {
                match &record.remote_id {
                    None => {
                        record.remote_id = Some(assigned);
                        changed = true;
                    }
                    Some(existing) if *existing != assigned => {
                        tracing::warn!(
                            "Ignoring remote id {} for {}; already assigned {}",
                            assigned,
                            local_id,
                            existing
                        );
                    }
                    Some(_) => {}
                }
            }

            if record.revision != revision {
                return Ok((MarkSynced::StillPending, changed));
            }
            if record.pending_sync {
                record.pending_sync = false;
                changed = true;
            }
            Ok((MarkSynced::Synced, changed))
        })
        .await
    }

    /// Physically delete a record after the remote confirmed its deletion.
    pub async fn remove(&self, local_id: &LocalId) -> Result<bool> {
        self.mutate(|records, _now| {
            let removed = records.remove(local_id).is_some();
            Ok((removed, removed))
        })
        .await
    }

    /// Track a remote record that must be deleted although its local record
    /// is already gone. The tombstone is removed once the delete succeeds.
    pub(crate) async fn insert_tombstone(
        &self,
        local_id: LocalId,
        remote_id: RemoteId,
        fields: RecordFields,
    ) -> Result<()> {
        self.mutate(|records, now| {
            if records.contains_key(&local_id) {
                return Ok(((), false));
            }
            let mut record = Record::new(fields, now);
            record.local_id = local_id;
            record.remote_id = Some(remote_id);
            record.tombstoned = true;
            records.insert(local_id, record);
            Ok(((), true))
        })
        .await
    }

    /// Merge a remote snapshot using whole-record last-writer-wins.
    pub async fn apply_merge(&self, remote_records: Vec<RemoteRecord>) -> Result<MergeReport> {
        self.mutate(|records, _now| {
            let report = merge::merge_snapshot(records, remote_records);
            let changed = report.changed();
            Ok((report, changed))
        })
        .await
    }

    /// Prepare, cache and attach a photo to a live record.
    ///
    /// The attachment is recorded as not yet uploaded; the sync engine uploads
    /// it once the record has a remote id.
    pub async fn attach(
        &self,
        attachments: &AttachmentManager,
        local_id: &LocalId,
        raw_bytes: Vec<u8>,
    ) -> Result<Record> {
        match self.get(local_id) {
            Some(record) if record.is_visible() => {}
            _ => return Err(Error::NotFound(local_id.to_string())),
        }

        let manager = attachments.clone();
        let prepared = tokio::task::spawn_blocking(move || manager.prepare(&raw_bytes))
            .await
            .map_err(|error| Error::Storage(format!("Attachment preparation failed: {error}")))??;
        self.store_prepared(attachments, local_id, &prepared).await
    }

    async fn store_prepared(
        &self,
        attachments: &AttachmentManager,
        local_id: &LocalId,
        prepared: &[u8],
    ) -> Result<Record> {
        let _attachment_guard = self.inner.attachment_lock.lock().await;
        let previous = attachments.cached_bytes(local_id)?;
        attachments.cache_locally(local_id, prepared)?;

        let size_bytes = u64::try_from(prepared.len()).unwrap_or(u64::MAX);
        let attachment = AttachmentRef::pending(ATTACHMENT_MIME_TYPE, size_bytes)?;
        let attached = self
            .mutate(|records, now| {
                let record = live_record_mut(records, local_id)?;
                record.touch(now);
                record.attachment = Some(attachment.with_revision(record.revision));
                tracing::debug!("Attached {} bytes to {}", size_bytes, local_id);
                Ok((record.clone(), true))
            })
            .await;

        if let Err(error) = &attached {
            tracing::debug!("Attaching to {} failed: {}", local_id, error);
            let restored = match previous {
                Some(bytes) => attachments.cache_locally(local_id, &bytes),
                None => attachments.discard(local_id).map(|_| ()),
            };
            if let Err(restore_error) = restored {
                tracing::warn!(
                    "Failed to restore cached attachment of {}: {}",
                    local_id,
                    restore_error
                );
            }
        }
        attached
    }

    /// Read a record with an unconfirmed attachment together with its cached
    /// bytes, or `None` if it no longer needs uploading.
    pub async fn upload_candidate(
        &self,
        attachments: &AttachmentManager,
        local_id: &LocalId,
    ) -> Result<Option<UploadCandidate>> {
        let _attachment_guard = self.inner.attachment_lock.lock().await;
        let Some(record) = self
            .get(local_id)
            .filter(|record| record.is_visible() && record.has_pending_upload())
        else {
            return Ok(None);
        };
        let bytes = attachments.recover_local_bytes(&record)?;
        Ok(Some(UploadCandidate { record, bytes }))
    }

    /// Store the reference the remote assigned to an uploaded attachment.
    ///
    /// Returns `false` without changes when the record's attachment is no
    /// longer the one with `attachment_revision`. Bookkeeping only: the record
    /// is neither bumped nor marked dirty.
    pub async fn confirm_attachment_upload(
        &self,
        local_id: &LocalId,
        attachment_revision: u64,
        remote_ref: String,
    ) -> Result<bool> {
        self.mutate(|records, _now| {
            let record = records
                .get_mut(local_id)
                .ok_or_else(|| Error::NotFound(local_id.to_string()))?;
            let Some(attachment) = record
                .attachment
                .as_mut()
                .filter(|attachment| attachment.revision == attachment_revision)
            else {
                return Ok((false, false));
            };
            if attachment.remote_ref.as_deref() == Some(remote_ref.as_str()) {
                return Ok((true, false));
            }
            attachment.remote_ref = Some(remote_ref);
            Ok((true, true))
        })
        .await
    }

    /// Drop cached bytes that a merge left without a matching attachment,
    /// unless a new photo has been attached since.
    pub async fn discard_stale_attachments(
        &self,
        attachments: &AttachmentManager,
        local_ids: &[LocalId],
    ) -> Result<usize> {
        let _attachment_guard = self.inner.attachment_lock.lock().await;
        let snapshot = self.snapshot();
        let mut discarded = 0;
        for local_id in local_ids {
            let reattached = snapshot
                .get(local_id)
                .is_some_and(Record::has_pending_upload);
            if !reattached && attachments.discard(local_id)? {
                discarded += 1;
            }
        }
        Ok(discarded)
    }

    /// Run [`AttachmentManager::retention_sweep`] over the current collection.
    pub async fn sweep_attachments(
        &self,
        attachments: &AttachmentManager,
        max_age_days: u32,
    ) -> Result<SweepReport> {
        let _attachment_guard = self.inner.attachment_lock.lock().await;
        let records = self.snapshot().iter().cloned().collect::<Vec<_>>();
        attachments.retention_sweep(&records, max_age_days, self.now())
    }
}

/// Keeps a record registered as having its create in flight.
pub(crate) struct CreateGuard {
    store: LocalStore,
    local_id: LocalId,
}

impl Drop for CreateGuard {
    fn drop(&mut self) {
        self.store.creating().remove(&self.local_id);
    }
}

fn live_record_mut<'a>(
    records: &'a mut BTreeMap<LocalId, Record>,
    local_id: &LocalId,
) -> Result<&'a mut Record> {
    records
        .get_mut(local_id)
        .filter(|record| !record.tombstoned)
        .ok_or_else(|| Error::NotFound(local_id.to_string()))
}
