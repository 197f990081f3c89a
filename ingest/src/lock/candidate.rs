use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BatchIdentity, SegmentMessage};

/// A batch's claim on the lock of its data object type.
///
/// Stored in the lock candidates table keyed by `(object_type_name, batch_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCandidate {
    pub object_type_name: String,
    pub batch_id: String,
    pub segment: u32,
    pub segments_total: u32,
    /// Creation time of the message that wrote the candidate.
    pub created: DateTime<Utc>,
    pub has_lock: bool,
}

impl LockCandidate {
    /// Creates a candidate that does not hold the lock yet.
    pub fn from_message(message: &SegmentMessage) -> Self {
        Self {
            object_type_name: message.object_type_name.clone(),
            batch_id: message.batch_id.clone(),
            segment: message.segment,
            segments_total: message.segments_total,
            created: message.created,
            has_lock: false,
        }
    }

    pub fn identity(&self) -> BatchIdentity {
        BatchIdentity::new(&self.object_type_name, &self.batch_id)
    }

    /// Returns `true` when `self` wins a contention against `other`.
    ///
    /// Candidates are ordered by creation time, then batch id, then segment.
    pub fn precedes(&self, other: &LockCandidate) -> bool {
        self.sort_key() < other.sort_key()
    }

    /// Returns `true` when the candidate is older than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);

        now.signed_duration_since(self.created) > timeout
    }

    fn sort_key(&self) -> (DateTime<Utc>, &str, u32) {
        (self.created, &self.batch_id, self.segment)
    }
}

/// Marks a batch as permanently forbidden from running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanceledBatchRecord {
    pub object_type_name: String,
    pub batch_id: String,
    pub canceled_at: DateTime<Utc>,
}

impl CanceledBatchRecord {
    pub fn new(batch: &BatchIdentity, canceled_at: DateTime<Utc>) -> Self {
        Self {
            object_type_name: batch.object_type_name.clone(),
            batch_id: batch.batch_id.clone(),
            canceled_at,
        }
    }
}
