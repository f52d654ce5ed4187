//! Background task keeping one claimed queue message invisible to other
//! consumers until explicitly released.
//!
//! Each monitor is a single spawned task bound 1:1 to one claimed message.
//! All renewal and terminal-action handling runs on that one task, so
//! renewal and acknowledgement for the same message can never race and the
//! ack handle needs no lock. Monitors for different messages are fully
//! independent and share nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::lease::{LeaseAction, LeaseInfo};
use crate::queue::{MessageQueue, QueueError};

/// Default wait for a terminal action before renewing, and the invisibility
/// window each renewal re-establishes.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(60);

/// At most one terminal action is ever legal per lease; the spare slot keeps
/// a buggy second send from blocking the caller.
const INBOX_CAPACITY: usize = 2;

pub struct LeaseMonitor;

impl LeaseMonitor {
    /// Begin the renewal loop for a freshly claimed message.
    ///
    /// The returned handle is the only way to reach the monitor: it can send
    /// exactly one terminal action, and dropping it before that action
    /// cancels the loop without acknowledging the message.
    pub fn start(
        cluster_id: &str,
        info: LeaseInfo,
        queue: Arc<dyn MessageQueue>,
        renew_interval: Duration,
    ) -> MonitorHandle {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let message_id = info.message_id.clone();
        let task = tokio::spawn(run(cluster_id.to_string(), info, queue, renew_interval, rx));
        MonitorHandle {
            tx,
            task,
            detached: AtomicBool::new(false),
            message_id,
        }
    }
}

/// Handle to a running lease monitor.
///
/// The handle owns the monitor's resources: dropping it while still attached
/// aborts the background task immediately, which may cut off an in-flight
/// renewal. That is the teardown path for a worker disconnecting mid-flight;
/// the queue re-exposes the message once the window lapses.
pub struct MonitorHandle {
    tx: mpsc::Sender<LeaseAction>,
    task: JoinHandle<()>,
    detached: AtomicBool,
    message_id: String,
}

impl MonitorHandle {
    /// Post a terminal action into the monitor's inbox. Fire-and-forget:
    /// if the monitor already stopped on its own (lock lost), the signal is
    /// dropped, and after [`detach`](Self::detach) it is ignored outright.
    pub fn signal(&self, action: LeaseAction) {
        if self.detached.load(Ordering::Acquire) {
            warn!(
                message_id = %self.message_id,
                ?action,
                "signal on detached monitor handle ignored"
            );
            return;
        }
        if self.tx.try_send(action).is_err() {
            debug!(
                message_id = %self.message_id,
                ?action,
                "monitor already stopped, terminal signal dropped"
            );
        }
    }

    /// One-shot disconnect. After this the handle no longer cancels the
    /// monitor on drop and further signals are ignored; the monitor drains
    /// whatever terminal action it already received and stops on its own.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if !self.detached.load(Ordering::Acquire) {
            self.task.abort();
        }
    }
}

/// The serialized per-message loop: wait one interval for a terminal action,
/// renew on timeout, acknowledge and stop on a terminal action.
async fn run(
    cluster_id: String,
    info: LeaseInfo,
    queue: Arc<dyn MessageQueue>,
    renew_interval: Duration,
    mut inbox: mpsc::Receiver<LeaseAction>,
) {
    loop {
        match timeout(renew_interval, inbox.recv()).await {
            // Interval elapsed with no terminal action: extend invisibility.
            Err(_elapsed) => {
                let renewed = queue
                    .extend_invisibility(
                        &info.queue,
                        &info.message_id,
                        &info.ack_handle,
                        renew_interval,
                    )
                    .await;
                match renewed {
                    Ok(()) => {
                        debug!(
                            cluster_id = %cluster_id,
                            work_item_id = %info.work_item_id,
                            message_id = %info.message_id,
                            "renewed message invisibility"
                        );
                    }
                    // Lock lost: another consumer owns the message now.
                    // Expected competitive loss, not an error.
                    Err(QueueError::HandleInvalid(reason)) => {
                        warn!(
                            cluster_id = %cluster_id,
                            work_item_id = %info.work_item_id,
                            message_id = %info.message_id,
                            %reason,
                            "message lease lost to another consumer, stopping monitor"
                        );
                        return;
                    }
                    // Transient fault: keep trying as long as the process is
                    // alive. Giving up here would silently drop the lease.
                    Err(err) => {
                        error!(
                            cluster_id = %cluster_id,
                            work_item_id = %info.work_item_id,
                            message_id = %info.message_id,
                            error = %err,
                            "failed to renew message invisibility, retrying next interval"
                        );
                    }
                }
            }
            // Terminal action: retire the message and stop. Complete and
            // Abandon acknowledge identically.
            Ok(Some(action)) => {
                if let Err(err) = queue
                    .acknowledge(&info.queue, &info.message_id, &info.ack_handle)
                    .await
                {
                    error!(
                        cluster_id = %cluster_id,
                        work_item_id = %info.work_item_id,
                        message_id = %info.message_id,
                        error = %err,
                        "failed to acknowledge message after terminal action"
                    );
                }
                match action {
                    LeaseAction::Complete => info!(
                        cluster_id = %cluster_id,
                        work_item_id = %info.work_item_id,
                        message_id = %info.message_id,
                        "work item completed, message retired"
                    ),
                    LeaseAction::Abandon => info!(
                        cluster_id = %cluster_id,
                        work_item_id = %info.work_item_id,
                        message_id = %info.message_id,
                        "work item abandoned, message retired"
                    ),
                }
                return;
            }
            // All senders gone without a terminal action.
            Ok(None) => {
                debug!(
                    cluster_id = %cluster_id,
                    work_item_id = %info.work_item_id,
                    message_id = %info.message_id,
                    "monitor inbox closed without terminal action, stopping"
                );
                return;
            }
        }
    }
}
