//! Message queue service contract consumed by the lease monitor.
//!
//! The queue delivers each message at least once and keeps a claimed message
//! invisible to other consumers for a bounded window. A consumer holds an
//! opaque ack handle for the claim; extending the window or acknowledging
//! (deleting) the message both require a still-valid handle. Once the window
//! lapses without acknowledgement the message re-becomes visible and the old
//! handle is dead.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Error, Clone)]
pub enum QueueError {
    /// The ack handle no longer identifies a claim this consumer owns: the
    /// message was acknowledged, redelivered, or claimed by someone else.
    #[error("ack handle invalid for message {0}")]
    HandleInvalid(String),
    #[error("transient queue failure: {0}")]
    Transient(String),
}

/// Abstract queue operations used while a message is claimed.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Push the message's invisibility deadline out to `now + window`.
    async fn extend_invisibility(
        &self,
        queue: &str,
        message_id: &str,
        ack_handle: &str,
        window: Duration,
    ) -> Result<(), QueueError>;

    /// Delete the message from the queue. Terminal for the claim.
    async fn acknowledge(
        &self,
        queue: &str,
        message_id: &str,
        ack_handle: &str,
    ) -> Result<(), QueueError>;
}

/// A message handed out by [`MemoryQueue::claim`].
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub message_id: String,
    pub ack_handle: String,
    pub body: Bytes,
    /// How many times this message has been claimed, this claim included.
    pub delivery_count: u32,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: Bytes,
    delivery_count: u32,
}

#[derive(Debug)]
struct InFlightMessage {
    message: StoredMessage,
    ack_handle: String,
    invisible_until: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    /// Keyed by message id: the queue enforces one claim per message.
    in_flight: HashMap<String, InFlightMessage>,
    extend_calls: HashMap<String, usize>,
    ack_calls: HashMap<String, usize>,
}

impl QueueState {
    /// Return lapsed in-flight messages to the ready queue, invalidating
    /// their ack handles. A claim lapses strictly after its deadline, so a
    /// renewal landing exactly at the deadline instant still succeeds.
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| now > f.invisible_until)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(flight) = self.in_flight.remove(&id) {
                self.ready.push_back(flight.message);
            }
        }
    }
}

/// In-memory queue with real invisibility-window semantics.
///
/// Intended for tests and development, in the spirit of the mock service
/// clients shipped alongside the real ones: messages move between a ready
/// queue and an in-flight map, claims mint fresh ack handles, and lapsed
/// claims are returned to ready on the next operation. Per-message call
/// counters and an injectable extend-error queue support precise assertions
/// about the renewal loop.
///
/// Deadlines use `tokio::time::Instant`, so tests under a paused clock can
/// drive expiry deterministically.
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    extend_faults: Mutex<VecDeque<QueueError>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            extend_faults: Mutex::new(VecDeque::new()),
        }
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Enqueue a message; returns its generated message id.
    pub fn push(&self, queue: &str, body: Bytes) -> String {
        let message_id = Uuid::new_v4().to_string();
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_default();
        state.ready.push_back(StoredMessage {
            message_id: message_id.clone(),
            body,
            delivery_count: 0,
        });
        message_id
    }

    /// Claim the next visible message, making it invisible for `window`.
    pub fn claim(&self, queue: &str, window: Duration) -> Option<ClaimedMessage> {
        let now = Instant::now();
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_default();
        state.release_expired(now);

        let mut message = state.ready.pop_front()?;
        message.delivery_count += 1;
        let ack_handle = Uuid::new_v4().to_string();
        let claimed = ClaimedMessage {
            message_id: message.message_id.clone(),
            ack_handle: ack_handle.clone(),
            body: message.body.clone(),
            delivery_count: message.delivery_count,
        };
        state.in_flight.insert(
            message.message_id.clone(),
            InFlightMessage {
                message,
                ack_handle,
                invisible_until: now + window,
            },
        );
        Some(claimed)
    }

    /// Number of extend-invisibility calls observed for a message,
    /// successful or not.
    pub fn extend_calls(&self, queue: &str, message_id: &str) -> usize {
        let queues = self.queues.lock().unwrap();
        queues
            .get(queue)
            .and_then(|s| s.extend_calls.get(message_id).copied())
            .unwrap_or(0)
    }

    /// Number of acknowledge calls observed for a message.
    pub fn ack_calls(&self, queue: &str, message_id: &str) -> usize {
        let queues = self.queues.lock().unwrap();
        queues
            .get(queue)
            .and_then(|s| s.ack_calls.get(message_id).copied())
            .unwrap_or(0)
    }

    /// Inject an error to be returned by the next extend-invisibility call.
    /// Multiple injected errors are consumed in order.
    pub fn push_extend_fault(&self, err: QueueError) {
        self.extend_faults.lock().unwrap().push_back(err);
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn extend_invisibility(
        &self,
        queue: &str,
        message_id: &str,
        ack_handle: &str,
        window: Duration,
    ) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_default();
        *state
            .extend_calls
            .entry(message_id.to_string())
            .or_insert(0) += 1;

        if let Some(err) = self.extend_faults.lock().unwrap().pop_front() {
            return Err(err);
        }

        state.release_expired(now);
        match state.in_flight.get_mut(message_id) {
            Some(flight) if flight.ack_handle == ack_handle => {
                flight.invisible_until = now + window;
                Ok(())
            }
            _ => Err(QueueError::HandleInvalid(message_id.to_string())),
        }
    }

    async fn acknowledge(
        &self,
        queue: &str,
        message_id: &str,
        ack_handle: &str,
    ) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_default();
        *state.ack_calls.entry(message_id.to_string()).or_insert(0) += 1;

        state.release_expired(now);
        let owned = matches!(
            state.in_flight.get(message_id),
            Some(flight) if flight.ack_handle == ack_handle
        );
        if !owned {
            return Err(QueueError::HandleInvalid(message_id.to_string()));
        }
        state.in_flight.remove(message_id);
        Ok(())
    }
}
