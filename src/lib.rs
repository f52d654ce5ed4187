//! Work-item lease subsystem for a distributed compute runtime.
//!
//! Once a worker dequeues a work item from the shared message queue, this
//! crate keeps that claim exclusive while the item is processed and records
//! the terminal outcome (success or fault) durably, exactly once. It
//! reconciles three independently failing systems (an at-least-once queue
//! with a bounded invisibility window, a durable record store, and a worker
//! process that may crash or stall) into one consistent lifecycle per item.
//!
//! Modules:
//!
//! - `lease`: the immutable claim identity (`LeaseInfo`) and terminal signals
//! - `lease_monitor`: per-message background task renewing queue invisibility
//! - `lease_token`: the public lifecycle handle handed to the execution layer
//! - `queue`: message queue service contract plus an in-memory implementation
//! - `record`: durable record store contract and sparse status updates
//! - `blob`: persisted payload retrieval contract
//! - `process`: owning-process identity
//! - `settings`: configuration loading
//! - `trace`: tracing/logging initialization

pub mod blob;
pub mod lease;
pub mod lease_monitor;
pub mod lease_token;
pub mod process;
pub mod queue;
pub mod record;
pub mod settings;
pub mod trace;

pub use tether_macros::test;
