//! Whole-record last-writer-wins merge of a remote snapshot.

use std::collections::BTreeMap;

use crate::models::{AttachmentRef, LocalId, Record, RemoteId};
use crate::remote::RemoteRecord;

/// Per-outcome counts of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Remote records with no local counterpart, added as synced.
    pub adopted: usize,
    /// Local records overwritten by a strictly newer remote copy.
    pub remote_won: usize,
    /// Local records kept because they are at least as new as the remote copy.
    pub local_won: usize,
    /// Remote copies discarded because the local record is tombstoned.
    pub tombstone_protected: usize,
    /// Records whose cached attachment bytes no longer match their attachment
    /// after the remote copy won.
    pub stale_attachments: Vec<LocalId>,
}

impl MergeReport {
    /// Whether the merge changed any local record.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.adopted > 0 || self.remote_won > 0
    }
}

/// Apply `snapshot` to `records`.
///
/// Records missing from the snapshot are never touched: the remote may omit
/// them because they were not pushed yet, or for paging/filtering reasons.
pub fn merge_snapshot(
    records: &mut BTreeMap<LocalId, Record>,
    snapshot: Vec<RemoteRecord>,
) -> MergeReport {
    let mut report = MergeReport::default();

    for remote in snapshot {
        match records.get_mut(&remote.local_id) {
            Some(local) if local.tombstoned => {
                tracing::debug!(
                    "Ignoring remote copy of tombstoned record {}",
                    local.local_id
                );
                report.tombstone_protected += 1;
            }
            Some(local) if remote.last_modified > local.last_modified => {
                if adopt_remote(local, remote) {
                    report.stale_attachments.push(local.local_id);
                }
                report.remote_won += 1;
            }
            Some(_) => {
                report.local_won += 1;
            }
            None => {
                let record = record_from_remote(remote);
                records.insert(record.local_id, record);
                report.adopted += 1;
            }
        }
    }

    report
}

/// Overwrite `local` with `remote`. Returns whether the locally cached
/// attachment bytes were superseded.
fn adopt_remote(local: &mut Record, remote: RemoteRecord) -> bool {
    tracing::debug!(
        "Remote copy of {} is newer ({} > {}); adopting it",
        local.local_id,
        remote.last_modified,
        local.last_modified
    );

    assign_remote_id(local, remote.remote_id);
    local.fields = remote.fields;
    local.last_modified = remote.last_modified;
    local.pending_sync = false;
    local.revision = local.revision.wrapping_add(1);

    let (attachment, stale) = match (remote.attachment_ref, local.attachment.take()) {
        (Some(remote_ref), Some(attachment))
            if attachment.remote_ref.as_deref() == Some(remote_ref.as_str()) =>
        {
            (Some(attachment), false)
        }
        (Some(remote_ref), Some(_)) => (Some(AttachmentRef::uploaded(remote_ref)), true),
        (Some(remote_ref), None) => (Some(AttachmentRef::uploaded(remote_ref)), false),
        // A local photo that never reached the remote must survive the overwrite.
        (None, Some(attachment)) if !attachment.is_uploaded() => (Some(attachment), false),
        (None, Some(_)) => (None, true),
        (None, None) => (None, false),
    };
    local.attachment = attachment;
    stale
}

fn assign_remote_id(local: &mut Record, remote_id: RemoteId) {
    match &local.remote_id {
        None => local.remote_id = Some(remote_id),
        Some(existing) if *existing != remote_id => {
            tracing::warn!(
                "Remote reported id {} for {} which already has id {}; keeping the original",
                remote_id,
                local.local_id,
                existing
            );
        }
        Some(_) => {}
    }
}

fn record_from_remote(remote: RemoteRecord) -> Record {
    Record {
        local_id: remote.local_id,
        remote_id: Some(remote.remote_id),
        fields: remote.fields,
        attachment: remote.attachment_ref.map(AttachmentRef::uploaded),
        last_modified: remote.last_modified,
        pending_sync: false,
        tombstoned: false,
        revision: 0,
    }
}
