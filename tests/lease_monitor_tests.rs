
use std::sync::Arc;
use std::time::Duration;

use tether::lease::LeaseAction;
use tether::lease_monitor::LeaseMonitor;
use tether::queue::QueueError;
use tokio::time::advance;

use test_helpers::*;

/// No renewal before the interval elapses; exactly one per elapsed interval
/// afterwards.
#[tether::test(start_paused = true)]
async fn renews_once_per_interval() {
    let env = test_env();
    let lease = claim_lease(&env);
    let message_id = lease.message_id.clone();
    let handle = LeaseMonitor::start(
        TEST_CLUSTER,
        lease,
        Arc::clone(&env.queue) as _,
        RENEW_INTERVAL,
    );
    settle().await;

    advance(Duration::from_secs(59)).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 0);

    advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);

    for expected in 2..=5 {
        advance(RENEW_INTERVAL).await;
        settle().await;
        assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), expected);
    }
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 0);

    drop(handle);
}

/// 59 seconds pass with no renewal, the 60th fires exactly one, then
/// Complete acknowledges once and renewals stop.
#[tether::test(start_paused = true)]
async fn complete_acknowledges_and_stops_renewing() {
    let env = test_env();
    let lease = claim_lease(&env);
    let message_id = lease.message_id.clone();
    let handle = LeaseMonitor::start(
        TEST_CLUSTER,
        lease,
        Arc::clone(&env.queue) as _,
        RENEW_INTERVAL,
    );
    settle().await;

    advance(Duration::from_secs(59)).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 0);

    advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);

    handle.signal(LeaseAction::Complete);
    handle.detach();
    settle().await;
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 1);

    // No further renewals however long the handle outlives the monitor.
    advance(Duration::from_secs(600)).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 1);

    drop(handle);
}

/// Abandon before any renewal tick acknowledges once, with zero renewals.
#[tether::test(start_paused = true)]
async fn abandon_before_first_tick_acknowledges() {
    let env = test_env();
    let lease = claim_lease(&env);
    let message_id = lease.message_id.clone();
    let handle = LeaseMonitor::start(
        TEST_CLUSTER,
        lease,
        Arc::clone(&env.queue) as _,
        RENEW_INTERVAL,
    );

    handle.signal(LeaseAction::Abandon);
    handle.detach();
    settle().await;

    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 1);
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 0);
}

/// A handle-invalid renewal response stops the monitor quietly, without an
/// acknowledgement call.
#[tether::test(start_paused = true)]
async fn lock_lost_stops_without_acknowledge() {
    let env = test_env();
    let lease = claim_lease(&env);
    let message_id = lease.message_id.clone();
    env.queue
        .push_extend_fault(QueueError::HandleInvalid(message_id.clone()));

    let handle = LeaseMonitor::start(
        TEST_CLUSTER,
        lease,
        Arc::clone(&env.queue) as _,
        RENEW_INTERVAL,
    );
    settle().await;

    advance(RENEW_INTERVAL).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);

    // Monitor stopped: later intervals produce no further calls.
    advance(Duration::from_secs(600)).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 0);

    // A terminal signal arriving after the loss is absorbed, not retried.
    handle.signal(LeaseAction::Complete);
    settle().await;
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 0);
}

/// Lock loss through real window lapse: a claim whose invisibility window is
/// shorter than the renewal cadence expires before the first renewal, and
/// the stale handle is rejected.
#[tether::test(start_paused = true)]
async fn lapsed_window_invalidates_handle() {
    let env = test_env();
    let lease = claim_lease_with_window(&env, Duration::from_secs(30));
    let message_id = lease.message_id.clone();
    let _handle = LeaseMonitor::start(
        TEST_CLUSTER,
        lease,
        Arc::clone(&env.queue) as _,
        RENEW_INTERVAL,
    );
    settle().await;

    // Window lapses at 30; the first renewal at 60 finds the claim gone.
    advance(RENEW_INTERVAL).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 0);

    // The message is claimable again by another consumer.
    let reclaimed = env
        .queue
        .claim(TEST_QUEUE, INITIAL_WINDOW)
        .expect("message redelivered");
    assert_eq!(reclaimed.message_id, message_id);
    assert_eq!(reclaimed.delivery_count, 2);
}

/// Transient renewal failures are logged and retried on the next tick,
/// indefinitely; the monitor never gives up on its own.
#[tether::test(start_paused = true)]
async fn transient_renewal_failure_retries() {
    let env = test_env();
    // Wide initial window so the claim survives the faulted ticks.
    let lease = claim_lease_with_window(&env, Duration::from_secs(600));
    let message_id = lease.message_id.clone();
    env.queue
        .push_extend_fault(QueueError::Transient("503 from queue service".to_string()));
    env.queue
        .push_extend_fault(QueueError::Transient("connection reset".to_string()));

    let handle = LeaseMonitor::start(
        TEST_CLUSTER,
        lease,
        Arc::clone(&env.queue) as _,
        RENEW_INTERVAL,
    );
    settle().await;

    // Two faulted ticks, then a clean one: the loop is still alive.
    for expected in 1..=3 {
        advance(RENEW_INTERVAL).await;
        settle().await;
        assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), expected);
    }
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 0);

    handle.signal(LeaseAction::Complete);
    handle.detach();
    settle().await;
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 1);
}

/// Dropping an un-detached handle cancels the loop without acknowledging,
/// and the queue redelivers once the window lapses.
#[tether::test(start_paused = true)]
async fn dropping_handle_cancels_without_acknowledge() {
    let env = test_env();
    let lease = claim_lease(&env);
    let message_id = lease.message_id.clone();
    let handle = LeaseMonitor::start(
        TEST_CLUSTER,
        lease,
        Arc::clone(&env.queue) as _,
        RENEW_INTERVAL,
    );
    settle().await;

    advance(RENEW_INTERVAL).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);

    drop(handle);
    settle().await;

    // Renewal stopped; invisibility lapses at claim + 60 + 60.
    advance(Duration::from_secs(600)).await;
    settle().await;
    assert_eq!(env.queue.extend_calls(TEST_QUEUE, &message_id), 1);
    assert_eq!(env.queue.ack_calls(TEST_QUEUE, &message_id), 0);

    let reclaimed = env
        .queue
        .claim(TEST_QUEUE, INITIAL_WINDOW)
        .expect("message redelivered after abandonment");
    assert_eq!(reclaimed.message_id, message_id);
}
