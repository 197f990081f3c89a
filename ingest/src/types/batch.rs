use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one full batch of one data-object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchIdentity {
    pub object_type_name: String,
    pub batch_id: String,
}

impl BatchIdentity {
    pub fn new(object_type_name: impl Into<String>, batch_id: impl Into<String>) -> Self {
        Self {
            object_type_name: object_type_name.into(),
            batch_id: batch_id.into(),
        }
    }

    /// Partition key shared by every per-batch row in the table store.
    pub fn batch_key(&self) -> String {
        format!("{}_{}", self.object_type_name, self.batch_id)
    }
}

impl fmt::Display for BatchIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object_type_name, self.batch_id)
    }
}

/// Where the records of a received segment can be loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadLocation {
    pub container: String,
    pub path: String,
}

impl PayloadLocation {
    pub fn new(container: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for PayloadLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.path)
    }
}

/// Message carried by every batch stage queue.
///
/// A stage fans out into `segments_total` messages numbered from 1. The same type is persisted as
/// the execution record of a segment, where `completed` and `completed_at` track its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMessage {
    pub object_type_name: String,
    pub batch_id: String,
    #[serde(default = "first_segment")]
    pub segment: u32,
    #[serde(default = "first_segment")]
    pub segments_total: u32,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Only set on messages of the receive stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadLocation>,
}

fn first_segment() -> u32 {
    1
}

impl SegmentMessage {
    /// Creates a message for `segment` of `segments_total`, created now.
    pub fn new(batch: &BatchIdentity, segment: u32, segments_total: u32) -> Self {
        Self {
            object_type_name: batch.object_type_name.clone(),
            batch_id: batch.batch_id.clone(),
            segment,
            segments_total,
            created: Utc::now(),
            completed: false,
            completed_at: None,
            payload: None,
        }
    }

    /// Creates the single-segment message that hands a batch over to its next stage.
    pub fn forwarded(batch: &BatchIdentity) -> Self {
        Self::new(batch, 1, 1)
    }

    pub fn with_payload(mut self, payload: PayloadLocation) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn identity(&self) -> BatchIdentity {
        BatchIdentity::new(&self.object_type_name, &self.batch_id)
    }

    pub fn batch_key(&self) -> String {
        self.identity().batch_key()
    }

    /// Returns `true` when `1 <= segment <= segments_total`.
    pub fn is_segment_in_range(&self) -> bool {
        self.segment >= 1 && self.segment <= self.segments_total
    }

    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created
    }
}
