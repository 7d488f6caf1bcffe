//! Reconciliation between the local store and the remote record service.
//!
//! [`SyncEngine::push`] submits every pending record as its own task and then
//! uploads attachments the remote has not confirmed yet. [`SyncEngine::pull`]
//! fetches a full remote snapshot, validates it and merges it in one commit.
//! Both are safe to call redundantly or concurrently: a record already being
//! submitted is skipped, a push only clears `pending_sync` for the exact
//! revision it sent, and an upload is only confirmed for the attachment
//! revision it read.

mod backoff;
mod state;

pub use backoff::{Backoff, RetryPolicy};
pub use state::{SyncState, SyncTrigger};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::attachments::AttachmentManager;
use crate::clock::{Clock, SystemClock};
use crate::models::{LocalId, Record, RemoteId};
use crate::remote::{DeleteOutcome, ListFilter, RecordPayload, RemoteError, RemoteService};
use crate::store::{LocalStore, MarkSynced, MergeReport, UploadCandidate};
use crate::{Error, Result};

/// Per-record result of a field push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Created,
    Updated,
    Deleted,
    /// The remote accepted the write but the record changed meanwhile.
    StillPending,
    /// The record was deleted locally while its create was in flight; the
    /// new remote copy was deleted again.
    Compensated,
    /// The record no longer needed pushing when its task ran.
    Skipped,
}

/// Per-record result of an attachment upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadOutcome {
    Uploaded,
    /// A different photo was attached while this one was being sent.
    Superseded,
    /// No cached bytes to send.
    Missing,
    Skipped,
}

/// Counts from one [`SyncEngine::push`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Accepted by the remote but edited locally during the request.
    pub still_pending: usize,
    pub compensated: usize,
    pub failed: usize,
    /// Waiting out a retry delay.
    pub deferred: usize,
    /// Already being pushed by another call.
    pub in_flight: usize,
    pub uploads: UploadReport,
}

impl PushReport {
    fn record(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Created => self.created += 1,
            PushOutcome::Updated => self.updated += 1,
            PushOutcome::Deleted => self.deleted += 1,
            PushOutcome::StillPending => self.still_pending += 1,
            PushOutcome::Compensated => self.compensated += 1,
            PushOutcome::Skipped => {}
        }
    }

    /// Records or attachments that failed and will be retried.
    #[must_use]
    pub const fn failures(&self) -> usize {
        self.failed + self.uploads.failed
    }
}

/// Counts from the attachment phase of a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    /// The cached bytes were gone, so nothing could be sent.
    pub missing: usize,
    /// Sent, but replaced locally before the remote confirmed it.
    pub superseded: usize,
    pub deferred: usize,
    pub in_flight: usize,
}

/// Result of one [`SyncEngine::pull`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Records in the remote snapshot.
    pub fetched: usize,
    pub merge: MergeReport,
}

/// Result of one [`SyncEngine::sync`] cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub push: PushReport,
    /// `None` when the pull was aborted.
    pub pull: Option<PullReport>,
    pub state: SyncState,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: LocalStore,
    attachments: AttachmentManager,
    remote: Arc<dyn RemoteService>,
    pushing: InFlight,
    uploading: InFlight,
    push_backoff: Backoff,
    upload_backoff: Backoff,
    status: watch::Sender<SyncState>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("store", &self.inner.store)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        attachments: AttachmentManager,
        remote: Arc<dyn RemoteService>,
    ) -> Self {
        Self::with_policy(
            store,
            attachments,
            remote,
            RetryPolicy::default(),
            Arc::new(SystemClock),
        )
    }

    pub fn with_policy(
        store: LocalStore,
        attachments: AttachmentManager,
        remote: Arc<dyn RemoteService>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _receiver) = watch::channel(SyncState::Offline);
        Self {
            inner: Arc::new(EngineInner {
                store,
                attachments,
                remote,
                pushing: InFlight::default(),
                uploading: InFlight::default(),
                push_backoff: Backoff::new(policy, clock.clone()),
                upload_backoff: Backoff::new(policy, clock),
                status,
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    #[must_use]
    pub fn status(&self) -> SyncState {
        *self.inner.status.borrow()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncState> {
        self.inner.status.subscribe()
    }

    /// Push, then pull, and publish the resulting status.
    pub async fn sync(&self, trigger: SyncTrigger) -> SyncReport {
        tracing::debug!("Sync cycle started ({})", trigger);
        self.inner.status.send_replace(SyncState::Syncing);

        let push = self.push().await;
        let (pull, pull_error) = match self.pull().await {
            Ok(report) => (Some(report), None),
            Err(error) => {
                tracing::warn!("Pull aborted: {}", error);
                (None, Some(error))
            }
        };

        let state = match pull_error {
            Some(Error::Remote(RemoteError::Transport(_))) => SyncState::Offline,
            Some(_) => SyncState::Error,
            None if push.failures() > 0 => SyncState::Error,
            None => SyncState::Synced,
        };
        self.inner.status.send_replace(state);

        tracing::info!(
            "Sync ({}) finished: {} created, {} updated, {} deleted, {} failed, {} uploaded; state {}",
            trigger,
            push.created,
            push.updated,
            push.deleted,
            push.failures(),
            push.uploads.uploaded,
            state
        );
        SyncReport {
            trigger,
            push,
            pull,
            state,
        }
    }

    /// Forget every retry delay and push immediately.
    pub async fn retry_now(&self) -> PushReport {
        self.inner.push_backoff.clear();
        self.inner.upload_backoff.clear();
        self.push().await
    }

    /// Run [`Self::sync`] every `period` until the returned task is aborted.
    pub fn spawn_auto_sync(&self, period: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.sync(SyncTrigger::Interval).await;
            }
        })
    }

    /// Submit every pending record, then upload unconfirmed attachments.
    ///
    /// Failures are isolated per record and scheduled for retry; they are
    /// reported in the counts, never returned.
    pub async fn push(&self) -> PushReport {
        let mut report = PushReport::default();
        let mut tasks = JoinSet::new();

        let snapshot = self.inner.store.snapshot();
        self.inner
            .push_backoff
            .retain(|local_id| snapshot.get(local_id).is_some_and(|record| record.pending_sync));
        self.inner.upload_backoff.retain(|local_id| {
            snapshot
                .get(local_id)
                .is_some_and(|record| record.is_visible() && record.has_pending_upload())
        });

        for record in snapshot.pending() {
            if !self.inner.push_backoff.is_ready(&record.local_id) {
                report.deferred += 1;
                continue;
            }
            let Some(guard) = self.inner.pushing.claim(record.local_id) else {
                report.in_flight += 1;
                continue;
            };
            let engine = self.clone();
            tasks.spawn(async move {
                let _guard = guard;
                let local_id = record.local_id;
                (local_id, engine.push_record(record).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((local_id, Ok(outcome))) => {
                    self.inner.push_backoff.record_success(&local_id);
                    report.record(outcome);
                }
                Ok((local_id, Err(error))) => {
                    let delay = self.inner.push_backoff.record_failure(local_id);
                    tracing::warn!(
                        "Push of {} failed, retrying in {}s: {}",
                        local_id,
                        delay.as_secs(),
                        error
                    );
                    report.failed += 1;
                }
                Err(error) => {
                    tracing::warn!("Push task failed: {}", error);
                    report.failed += 1;
                }
            }
        }

        report.uploads = self.upload_attachments().await;
        report
    }

    async fn push_record(&self, record: Record) -> Result<PushOutcome> {
        let store = &self.inner.store;
        let remote = self.inner.remote.as_ref();
        let _creating = store.begin_create(record.local_id);

        // The snapshot the task was started from may be stale by now.
        let Some(record) = store.get(&record.local_id).filter(|record| record.pending_sync) else {
            return Ok(PushOutcome::Skipped);
        };
        let payload = RecordPayload {
            local_id: record.local_id,
            fields: record.fields.clone(),
            last_modified: record.last_modified,
        };

        match (record.remote_id.clone(), record.tombstoned) {
            (Some(remote_id), true) => {
                if remote.delete(&remote_id).await? == DeleteOutcome::NotFound {
                    tracing::debug!("Remote copy of {} was already gone", record.local_id);
                }
                store.remove(&record.local_id).await?;
                self.discard_cached(&record.local_id);
                tracing::debug!("Deleted {} ({})", record.local_id, remote_id);
                Ok(PushOutcome::Deleted)
            }
            (None, true) => {
                store.remove(&record.local_id).await?;
                self.discard_cached(&record.local_id);
                Ok(PushOutcome::Deleted)
            }
            (None, false) => {
                let remote_id = remote.create(&payload).await?;
                tracing::debug!("Created {} as {}", record.local_id, remote_id);
                match store
                    .mark_synced(&record.local_id, Some(remote_id.clone()), record.revision)
                    .await
                {
                    Ok(_) if is_tombstoned(store, &record.local_id) => {
                        self.compensate_create(&record, remote_id).await
                    }
                    Ok(marked) => Ok(synced_outcome(marked, PushOutcome::Created)),
                    Err(Error::NotFound(_)) => self.compensate_create(&record, remote_id).await,
                    Err(error) => Err(error),
                }
            }
            (Some(remote_id), false) => {
                remote.update(&remote_id, &payload).await?;
                tracing::debug!("Updated {} ({})", record.local_id, remote_id);
                let marked = store
                    .mark_synced(&record.local_id, None, record.revision)
                    .await?;
                Ok(synced_outcome(marked, PushOutcome::Updated))
            }
        }
    }

    /// Delete the remote copy of a record that was deleted locally while its
    /// create was in flight. If that fails, a tombstone carrying the new
    /// remote id keeps the delete pending so a later push retries it.
    async fn compensate_create(&self, record: &Record, remote_id: RemoteId) -> Result<PushOutcome> {
        tracing::debug!(
            "{} was deleted during its create; removing remote copy {}",
            record.local_id,
            remote_id
        );
        match self.inner.remote.delete(&remote_id).await {
            Ok(_) => {
                self.inner.store.remove(&record.local_id).await?;
                self.discard_cached(&record.local_id);
                Ok(PushOutcome::Compensated)
            }
            Err(error) => {
                self.inner
                    .store
                    .insert_tombstone(record.local_id, remote_id, record.fields.clone())
                    .await?;
                Err(error.into())
            }
        }
    }

    fn discard_cached(&self, local_id: &LocalId) {
        if let Err(error) = self.inner.attachments.discard(local_id) {
            tracing::warn!("Failed to discard cached attachment of {}: {}", local_id, error);
        }
    }

    async fn upload_attachments(&self) -> UploadReport {
        let mut report = UploadReport::default();
        let mut tasks = JoinSet::new();

        let snapshot = self.inner.store.snapshot();
        let candidates = snapshot
            .iter()
            .filter(|record| {
                record.is_visible() && record.remote_id.is_some() && record.has_pending_upload()
            })
            .map(|record| record.local_id);

        for local_id in candidates {
            if !self.inner.upload_backoff.is_ready(&local_id) {
                report.deferred += 1;
                continue;
            }
            let Some(guard) = self.inner.uploading.claim(local_id) else {
                report.in_flight += 1;
                continue;
            };
            let engine = self.clone();
            tasks.spawn(async move {
                let _guard = guard;
                (local_id, engine.upload_record(&local_id).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((local_id, Ok(UploadOutcome::Missing))) => {
                    self.inner.upload_backoff.record_failure(local_id);
                    tracing::warn!("No cached attachment to upload for {}", local_id);
                    report.missing += 1;
                }
                Ok((local_id, Ok(outcome))) => {
                    self.inner.upload_backoff.record_success(&local_id);
                    match outcome {
                        UploadOutcome::Uploaded => report.uploaded += 1,
                        UploadOutcome::Superseded => report.superseded += 1,
                        UploadOutcome::Missing | UploadOutcome::Skipped => {}
                    }
                }
                Ok((local_id, Err(error))) => {
                    let delay = self.inner.upload_backoff.record_failure(local_id);
                    tracing::warn!(
                        "Attachment upload for {} failed, retrying in {}s: {}",
                        local_id,
                        delay.as_secs(),
                        error
                    );
                    report.failed += 1;
                }
                Err(error) => {
                    tracing::warn!("Upload task failed: {}", error);
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn upload_record(&self, local_id: &LocalId) -> Result<UploadOutcome> {
        let store = &self.inner.store;
        let Some(UploadCandidate { record, bytes }) = store
            .upload_candidate(&self.inner.attachments, local_id)
            .await?
        else {
            return Ok(UploadOutcome::Skipped);
        };
        let Some(bytes) = bytes else {
            return Ok(UploadOutcome::Missing);
        };
        let Some(revision) = record.attachment.as_ref().map(|attachment| attachment.revision) else {
            return Ok(UploadOutcome::Skipped);
        };

        let reference = self
            .inner
            .attachments
            .upload(self.inner.remote.as_ref(), &record, &bytes)
            .await?;
        if store
            .confirm_attachment_upload(local_id, revision, reference)
            .await?
        {
            Ok(UploadOutcome::Uploaded)
        } else {
            tracing::debug!(
                "Attachment of {} changed during upload; the new one stays pending",
                local_id
            );
            Ok(UploadOutcome::Superseded)
        }
    }

    /// Fetch the remote collection and merge it.
    ///
    /// The snapshot is validated as a whole first; any transport or payload
    /// error aborts the pull before the store is touched.
    pub async fn pull(&self) -> Result<PullReport> {
        let snapshot = self.inner.remote.list(&ListFilter::default()).await?;

        let mut seen = HashSet::with_capacity(snapshot.len());
        for record in &snapshot {
            record.validate()?;
            if !seen.insert(record.local_id) {
                return Err(RemoteError::InvalidPayload(format!(
                    "snapshot lists record {} more than once",
                    record.local_id
                ))
                .into());
            }
        }

        let fetched = snapshot.len();
        let store = &self.inner.store;
        let merge = store.apply_merge(snapshot).await?;
        if !merge.stale_attachments.is_empty() {
            if let Err(error) = store
                .discard_stale_attachments(&self.inner.attachments, &merge.stale_attachments)
                .await
            {
                tracing::warn!("Failed to drop replaced attachments: {}", error);
            }
        }
        tracing::debug!(
            "Pulled {} record(s): {} adopted, {} remote won, {} local won, {} tombstone protected",
            fetched,
            merge.adopted,
            merge.remote_won,
            merge.local_won,
            merge.tombstone_protected
        );
        Ok(PullReport { fetched, merge })
    }
}

fn is_tombstoned(store: &LocalStore, local_id: &LocalId) -> bool {
    store.get(local_id).is_some_and(|record| record.tombstoned)
}

const fn synced_outcome(marked: MarkSynced, synced: PushOutcome) -> PushOutcome {
    match marked {
        MarkSynced::Synced => synced,
        MarkSynced::StillPending => PushOutcome::StillPending,
    }
}

/// Set of records currently being submitted.
#[derive(Default)]
struct InFlight {
    ids: Arc<Mutex<HashSet<LocalId>>>,
}

impl InFlight {
    /// Claim `local_id`, or `None` if another task already holds it.
    fn claim(&self, local_id: LocalId) -> Option<InFlightGuard> {
        let inserted = self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local_id);
        inserted.then(|| InFlightGuard {
            ids: self.ids.clone(),
            local_id,
        })
    }
}

struct InFlightGuard {
    ids: Arc<Mutex<HashSet<LocalId>>>,
    local_id: LocalId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.local_id);
    }
}
