//! Core lease value types shared by the monitor and the token.

use uuid::Uuid;

use crate::record::WorkItemKey;

/// Immutable identity of one claimed queue message.
///
/// The `ack_handle` is valid only until the monitor acknowledges the message
/// or the invisibility window lapses; after either, it must not be reused.
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    pub message_id: String,
    pub queue: String,
    pub ack_handle: String,
    pub owner_process_id: String,
    pub work_item_id: Uuid,
    /// Index into the persisted payload when the blob holds a batch.
    pub batch_index: Option<usize>,
    /// Worker affinity passed through from the dispatcher, never resolved here.
    pub target_worker: Option<String>,
    /// Key of the persisted payload in blob storage.
    pub blob_key: String,
}

impl LeaseInfo {
    /// Key of the work item's durable record.
    pub fn record_key(&self) -> WorkItemKey {
        WorkItemKey {
            process_id: self.owner_process_id.clone(),
            work_item_id: self.work_item_id,
        }
    }
}

/// The only two terminal signals a lease token may send its monitor.
///
/// Both retire the queue message identically; the distinction exists for the
/// caller's intent and logging, not for queue semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Complete,
    Abandon,
}
