//! Per data object type locking.
//!
//! Only one batch per data object type runs its lock-requiring stages at a time. Batches that
//! lose contention are rescheduled onto a time grid, see [`schedule`].

mod candidate;
mod manager;
pub mod schedule;

pub use candidate::{CanceledBatchRecord, LockCandidate};
pub use manager::{DeniedOutcome, LockResult, TypeLockManager};
