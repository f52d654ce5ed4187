//! The public lifecycle handle for a claimed work item.
//!
//! The execution layer receives a [`LeaseToken`] per claimed message and
//! calls exactly one of [`declare_completed`](LeaseToken::declare_completed)
//! or [`declare_faulted`](LeaseToken::declare_faulted) when done. Either one
//! stops the monitor (retiring the queue message) and writes the terminal
//! status record. If neither is ever called, the monitor keeps renewing
//! until its process disappears and the queue redelivers the message, which
//! is the sole recovery path for worker death.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blob::{BlobError, BlobStore, PersistedPayload};
use crate::lease::{LeaseAction, LeaseInfo};
use crate::lease_monitor::{DEFAULT_RENEW_INTERVAL, LeaseMonitor, MonitorHandle};
use crate::process::{ProcessHandle, ProcessInfo};
use crate::queue::MessageQueue;
use crate::record::{EtagMatch, FaultInfo, RecordStore, RecordStoreError, WorkItemUpdate, now_epoch_ms};

/// Shared collaborators a worker process wires once and hands to every
/// claim.
pub struct LeaseRuntime {
    pub queue: Arc<dyn MessageQueue>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub renew_interval: Duration,
}

impl LeaseRuntime {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            queue,
            records,
            blobs,
            renew_interval: DEFAULT_RENEW_INTERVAL,
        }
    }

    pub fn with_renew_interval(mut self, renew_interval: Duration) -> Self {
        self.renew_interval = renew_interval;
        self
    }
}

/// Static metadata about the work item, known to the dispatcher at claim
/// time.
#[derive(Debug, Clone)]
pub struct WorkItemDescriptor {
    pub work_item_type: String,
    pub size_bytes: u64,
    pub type_name: String,
    /// Fault context from a previous delivery of this item, if any.
    pub fault_info: Option<FaultInfo>,
}

/// Exception payload a worker reports with a fault. Serialized into the
/// durable record's `last_exception` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemFault {
    pub error_code: String,
    pub message: String,
}

impl WorkItemFault {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LeaseTokenError {
    #[error(transparent)]
    Record(#[from] RecordStoreError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("fault serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("terminal state already declared for work item {0}")]
    AlreadyDeclared(Uuid),
    #[error("payload for work item {0} is a batch but the lease carries no batch index")]
    MissingBatchIndex(Uuid),
    #[error("batch index {index} out of range for work item {work_item_id}: payload has {len} entries")]
    BatchIndexOutOfRange {
        work_item_id: Uuid,
        index: usize,
        len: usize,
    },
}

/// Lifecycle handle for one claimed work item.
///
/// Immutable apart from the owned monitor handle, which is consumed by the
/// first terminal declaration.
pub struct LeaseToken {
    cluster_id: String,
    monitor: Mutex<Option<MonitorHandle>>,
    descriptor: WorkItemDescriptor,
    lease_info: LeaseInfo,
    process_info: ProcessInfo,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
}

impl LeaseToken {
    /// Claim a freshly dequeued message: start its monitor, then assemble
    /// the token around the running monitor's handle. Starting the monitor
    /// first means the token can always declare safely.
    pub fn claim(
        runtime: &LeaseRuntime,
        cluster_id: &str,
        descriptor: WorkItemDescriptor,
        process_info: ProcessInfo,
        lease_info: LeaseInfo,
    ) -> Arc<Self> {
        let handle = LeaseMonitor::start(
            cluster_id,
            lease_info.clone(),
            Arc::clone(&runtime.queue),
            runtime.renew_interval,
        );
        Arc::new(Self {
            cluster_id: cluster_id.to_string(),
            monitor: Mutex::new(Some(handle)),
            descriptor,
            lease_info,
            process_info,
            records: Arc::clone(&runtime.records),
            blobs: Arc::clone(&runtime.blobs),
        })
    }

    /// Report successful completion: stop the monitor (retiring the queue
    /// message) and write the terminal record.
    ///
    /// The store write is not retried here. By the time it runs the message
    /// is already acknowledged, so a failure is a durability gap the
    /// surrounding orchestration must handle.
    pub async fn declare_completed(&self) -> Result<(), LeaseTokenError> {
        let handle = self.take_monitor()?;
        handle.signal(LeaseAction::Complete);
        handle.detach();

        let update = WorkItemUpdate::completed_at(now_epoch_ms());
        self.records
            .upsert(&self.lease_info.record_key(), update, EtagMatch::Any)
            .await?;
        Ok(())
    }

    /// Report a worker-declared fault: stop the monitor and write the fault
    /// record.
    ///
    /// The monitor is told to abandon, which still retires the queue
    /// message: fault routing happens through the durable record, not
    /// through queue redelivery.
    pub async fn declare_faulted(&self, fault: &WorkItemFault) -> Result<(), LeaseTokenError> {
        let serialized = serde_json::to_string(fault)?;

        let handle = self.take_monitor()?;
        handle.signal(LeaseAction::Abandon);
        handle.detach();

        let update = WorkItemUpdate::faulted(serialized);
        self.records
            .upsert(&self.lease_info.record_key(), update, EtagMatch::Any)
            .await?;
        Ok(())
    }

    /// Retrieve this work item's payload from blob storage. When the stored
    /// blob holds a batch, the lease must carry a batch index; its absence
    /// is a contract violation, not a recoverable condition.
    pub async fn get_work_item(&self) -> Result<Bytes, LeaseTokenError> {
        let payload = self
            .blobs
            .read_persisted_payload(&self.cluster_id, &self.lease_info.blob_key)
            .await?;
        match payload {
            PersistedPayload::Single(body) => Ok(body),
            PersistedPayload::Batch(items) => {
                let index = self
                    .lease_info
                    .batch_index
                    .ok_or(LeaseTokenError::MissingBatchIndex(self.lease_info.work_item_id))?;
                items
                    .get(index)
                    .cloned()
                    .ok_or(LeaseTokenError::BatchIndexOutOfRange {
                        work_item_id: self.lease_info.work_item_id,
                        index,
                        len: items.len(),
                    })
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.lease_info.work_item_id
    }

    pub fn work_item_type(&self) -> &str {
        &self.descriptor.work_item_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.descriptor.size_bytes
    }

    pub fn type_name(&self) -> &str {
        &self.descriptor.type_name
    }

    pub fn fault_info(&self) -> Option<FaultInfo> {
        self.descriptor.fault_info
    }

    pub fn target_worker(&self) -> Option<&str> {
        self.lease_info.target_worker.as_deref()
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn lease_info(&self) -> &LeaseInfo {
        &self.lease_info
    }

    /// Handle to the owning logical job.
    pub fn process(&self) -> ProcessHandle {
        ProcessHandle::new(self.process_info.clone())
    }

    fn take_monitor(&self) -> Result<MonitorHandle, LeaseTokenError> {
        self.monitor
            .lock()
            .unwrap()
            .take()
            .ok_or(LeaseTokenError::AlreadyDeclared(self.lease_info.work_item_id))
    }
}
