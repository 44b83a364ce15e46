//! Transfer coordination
//!
//! Every balance-changing chain interaction goes through
//! [`TransferCoordinator`].
//!
//! # Consistency model
//!
//! The chain submission and the cache update are not one atomic unit. The
//! chain is at-least-once authoritative and the cache is eventually
//! consistent:
//!
//! 1. **Chain decides sufficiency**: the cached balance is never trusted for
//!    the funds check.
//! 2. **Serialize per source**: check and submit run under the source
//!    account's lock.
//! 3. **Resync, never compute**: after confirmation both caches are
//!    overwritten from the chain.
//! 4. **Never resubmit on doubt**: an unknown outcome is healed by
//!    `reconcile` or the [`ReconcileWorker`], not by another submission.

pub mod coordinator;
pub mod locks;
pub mod types;
pub mod worker;

pub use coordinator::TransferCoordinator;
pub use locks::{KeyGuard, KeyedLocks};
pub use types::{Reconciliation, TransferReceipt};
pub use worker::{ReconcileWorker, SweepReport, WorkerConfig};
