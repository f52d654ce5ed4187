//! Durable record store contract and work-item status marshaling.
//!
//! A work item's durable record is keyed by `(owner process id, work item
//! id)` and outlives the lease. This subsystem only ever writes a strict
//! subset of its fields, as a sparse update: each updatable column is wrapped
//! in a [`Field`] that is explicitly left unchanged, cleared, or set, so an
//! upsert never clobbers columns it did not mean to touch.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Get current epoch time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Key of a work item's durable record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItemKey {
    pub process_id: String,
    pub work_item_id: Uuid,
}

/// Terminal status values this subsystem writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItemStatus {
    Completed,
    Faulted,
}

/// How a fault came to be recorded against a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultInfo {
    /// The worker processed the item and reported the fault itself.
    DeclaredByWorker,
    /// The worker disappeared and the item's lease lapsed at the queue.
    LeaseExpired,
}

/// Tagged present/absent wrapper for one updatable record column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    /// Leave the stored value as it is.
    Unchanged,
    /// Remove the stored value.
    Clear,
    /// Overwrite the stored value.
    Set(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unchanged
    }
}

impl<T: Clone> Field<T> {
    fn apply(&self, slot: &mut Option<T>) {
        match self {
            Field::Unchanged => {}
            Field::Clear => *slot = None,
            Field::Set(value) => *slot = Some(value.clone()),
        }
    }
}

/// Sparse update of a work item's status columns.
#[derive(Debug, Clone, Default)]
pub struct WorkItemUpdate {
    pub status: Field<WorkItemStatus>,
    pub completed: Field<bool>,
    pub completion_time_ms: Field<i64>,
    pub last_exception: Field<String>,
    pub fault_info: Field<FaultInfo>,
}

impl WorkItemUpdate {
    /// Marshaling for a successful completion at `now_ms`.
    pub fn completed_at(now_ms: i64) -> Self {
        Self {
            status: Field::Set(WorkItemStatus::Completed),
            completed: Field::Set(true),
            completion_time_ms: Field::Set(now_ms),
            ..Self::default()
        }
    }

    /// Marshaling for a worker-declared fault. The completion time is
    /// cleared so downstream fault handling never sees a stale value.
    pub fn faulted(last_exception: String) -> Self {
        Self {
            status: Field::Set(WorkItemStatus::Faulted),
            completed: Field::Set(false),
            completion_time_ms: Field::Clear,
            last_exception: Field::Set(last_exception),
            fault_info: Field::Set(FaultInfo::DeclaredByWorker),
        }
    }
}

/// Optimistic-concurrency condition attached to an upsert.
#[derive(Debug, Clone)]
pub enum EtagMatch {
    /// Write regardless of the stored version. This subsystem always uses
    /// `Any`: only the owning lease token writes terminal state, so there
    /// is no read-modify-write contention to guard against.
    Any,
    /// Write only if the stored etag matches.
    Exact(String),
}

#[derive(Debug, Error, Clone)]
pub enum RecordStoreError {
    #[error("etag mismatch for work item {work_item_id}: expected {expected}, found {found}")]
    EtagMismatch {
        work_item_id: Uuid,
        expected: String,
        found: String,
    },
    #[error("record store throttled the write: {0}")]
    Throttled(String),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store rejected the write: {0}")]
    Validation(String),
}

/// Single-item conditional upsert against the durable record store.
///
/// Errors propagate to the caller verbatim; the write succeeds or fails
/// atomically as one item.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert(
        &self,
        key: &WorkItemKey,
        update: WorkItemUpdate,
        etag: EtagMatch,
    ) -> Result<(), RecordStoreError>;
}

/// Stored shape of the columns this subsystem writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkItemRecord {
    pub status: Option<WorkItemStatus>,
    pub completed: Option<bool>,
    pub completion_time_ms: Option<i64>,
    pub last_exception: Option<String>,
    pub fault_info: Option<FaultInfo>,
    pub etag: String,
}

/// In-memory record store for tests and development.
///
/// Applies [`Field`] semantics per column, bumps the etag on every write,
/// rejects mismatched exact-etag writes, and can have failures injected to
/// exercise the durability-gap path.
pub struct MemoryRecordStore {
    records: Mutex<HashMap<WorkItemKey, WorkItemRecord>>,
    write_calls: Mutex<HashMap<WorkItemKey, usize>>,
    faults: Mutex<VecDeque<RecordStoreError>>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            write_calls: Mutex::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
        }
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn get(&self, key: &WorkItemKey) -> Option<WorkItemRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    /// Number of successful writes applied for a key.
    pub fn write_calls(&self, key: &WorkItemKey) -> usize {
        self.write_calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Inject an error to be returned by the next upsert. Multiple injected
    /// errors are consumed in order.
    pub fn push_fault(&self, err: RecordStoreError) {
        self.faults.lock().unwrap().push_back(err);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(
        &self,
        key: &WorkItemKey,
        update: WorkItemUpdate,
        etag: EtagMatch,
    ) -> Result<(), RecordStoreError> {
        if let Some(err) = self.faults.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut records = self.records.lock().unwrap();
        if let EtagMatch::Exact(expected) = &etag {
            let found = records
                .get(key)
                .map(|r| r.etag.clone())
                .unwrap_or_default();
            if found != *expected {
                return Err(RecordStoreError::EtagMismatch {
                    work_item_id: key.work_item_id,
                    expected: expected.clone(),
                    found,
                });
            }
        }
        let record = records.entry(key.clone()).or_default();

        update.status.apply(&mut record.status);
        update.completed.apply(&mut record.completed);
        update.completion_time_ms.apply(&mut record.completion_time_ms);
        update.last_exception.apply(&mut record.last_exception);
        update.fault_info.apply(&mut record.fault_info);
        record.etag = Uuid::new_v4().to_string();

        *self.write_calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        Ok(())
    }
}
