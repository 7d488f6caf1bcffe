//! In-process remote collection with failure injection, for engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{
    DeleteOutcome, ListFilter, RecordPayload, RemoteError, RemoteRecord, RemoteResult,
    RemoteService,
};
use crate::models::{LocalId, RemoteId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Update,
    Delete,
    List,
    Attach,
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, RemoteRecord>,
    failing: HashSet<Op>,
    failing_records: HashSet<LocalId>,
    calls: HashMap<Op, usize>,
    missing_on_delete: bool,
    snapshot_override: Option<Vec<RemoteRecord>>,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
    next_id: AtomicU64,
    gate: Mutex<Option<Arc<Notify>>>,
    acks: Mutex<HashMap<Op, Arc<Notify>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, op: Op) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing.clear();
        state.failing_records.clear();
    }

    pub fn fail_record(&self, local_id: LocalId) {
        self.state.lock().unwrap().failing_records.insert(local_id);
    }

    /// Report every delete as "not found" without touching the collection.
    pub fn report_missing_on_delete(&self) {
        self.state.lock().unwrap().missing_on_delete = true;
    }

    /// Serve this exact snapshot from `list` instead of the collection.
    pub fn serve_snapshot(&self, records: Vec<RemoteRecord>) {
        self.state.lock().unwrap().snapshot_override = Some(records);
    }

    pub fn insert(&self, record: RemoteRecord) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(record.remote_id.as_str().to_string(), record);
    }

    pub fn get(&self, remote_id: &RemoteId) -> Option<RemoteRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(remote_id.as_str())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&op)
            .copied()
            .unwrap_or_default()
    }

    /// Hold every create/update until the returned handle is notified.
    pub fn hold_writes(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Apply the next `op` remotely but hold its response until the returned
    /// handle is notified.
    pub fn hold_acks(&self, op: Op) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.acks.lock().unwrap().insert(op, notify.clone());
        notify
    }

    async fn wait_for_ack(&self, op: Op) {
        let gate = self.acks.lock().unwrap().remove(&op);
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    async fn wait_for_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn enter(&self, op: Op, local_id: Option<LocalId>) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_default() += 1;
        if state.failing.contains(&op)
            || local_id.is_some_and(|local_id| state.failing_records.contains(&local_id))
        {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn create(&self, payload: &RecordPayload) -> RemoteResult<RemoteId> {
        self.enter(Op::Create, Some(payload.local_id))?;
        self.wait_for_gate().await;
        let remote_id = RemoteId::new(format!(
            "r{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        self.insert(RemoteRecord {
            remote_id: remote_id.clone(),
            local_id: payload.local_id,
            fields: payload.fields.clone(),
            last_modified: payload.last_modified,
            attachment_ref: None,
        });
        self.wait_for_ack(Op::Create).await;
        Ok(remote_id)
    }

    async fn update(&self, remote_id: &RemoteId, payload: &RecordPayload) -> RemoteResult<()> {
        self.enter(Op::Update, Some(payload.local_id))?;
        self.wait_for_gate().await;
        {
            let mut state = self.state.lock().unwrap();
            let record = state.records.get_mut(remote_id.as_str()).ok_or(RemoteError::Api {
                status: 404,
                message: "not found".to_string(),
            })?;
            record.fields = payload.fields.clone();
            record.last_modified = payload.last_modified;
        }
        self.wait_for_ack(Op::Update).await;
        Ok(())
    }

    async fn delete(&self, remote_id: &RemoteId) -> RemoteResult<DeleteOutcome> {
        self.enter(Op::Delete, None)?;
        let mut state = self.state.lock().unwrap();
        if state.missing_on_delete {
            return Ok(DeleteOutcome::NotFound);
        }
        Ok(match state.records.remove(remote_id.as_str()) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn list(&self, filter: &ListFilter) -> RemoteResult<Vec<RemoteRecord>> {
        self.enter(Op::List, None)?;
        let state = self.state.lock().unwrap();
        let records = state
            .snapshot_override
            .clone()
            .unwrap_or_else(|| state.records.values().cloned().collect());
        Ok(records
            .into_iter()
            .filter(|record| {
                filter
                    .modified_since
                    .map_or(true, |since| record.last_modified > since)
            })
            .collect())
    }

    async fn attach(
        &self,
        remote_id: &RemoteId,
        bytes: &[u8],
        _mime_type: &str,
    ) -> RemoteResult<String> {
        self.enter(Op::Attach, None)?;
        let reference = format!("photos/{remote_id}-{}.jpg", bytes.len());
        {
            let mut state = self.state.lock().unwrap();
            let record = state.records.get_mut(remote_id.as_str()).ok_or(RemoteError::Api {
                status: 404,
                message: "not found".to_string(),
            })?;
            record.attachment_ref = Some(reference.clone());
        }
        self.wait_for_ack(Op::Attach).await;
        Ok(reference)
    }
}
