use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::DataObjectIdentifier;

/// Suffix appended to the hash of documents written by an aborted batch.
///
/// A marked hash never matches an incoming record, so the next batch rewrites the document.
pub const ABORTED_HASH_MARK: &str = "#aborted";

/// Lifecycle status of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Active,
    SoftDeleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Active => "active",
            DocumentStatus::SoftDeleted => "soft_deleted",
        }
    }
}

/// A record as stored in the document store, with its ingestion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub partition_key: String,
    pub status: DocumentStatus,
    /// Batch that last wrote this document.
    pub batch_id: String,
    pub hash: String,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub body: Map<String, Value>,
}

impl Document {
    /// Builds the active document written for `record` by `batch_id`.
    pub fn from_record(record: IncomingRecord, batch_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            partition_key: record.partition_key,
            status: DocumentStatus::Active,
            batch_id: batch_id.to_string(),
            hash: record.hash,
            last_update: now,
            body: record.body,
        }
    }

    pub fn identifier(&self) -> DataObjectIdentifier {
        DataObjectIdentifier::new(&self.id, &self.partition_key)
    }

    pub fn is_marked_aborted(&self) -> bool {
        self.hash.ends_with(ABORTED_HASH_MARK)
    }
}

/// A record delivered by a payload source, already parsed and hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRecord {
    pub id: String,
    pub partition_key: String,
    pub hash: String,
    #[serde(default)]
    pub body: Map<String, Value>,
}

impl IncomingRecord {
    pub fn new(
        id: impl Into<String>,
        partition_key: impl Into<String>,
        hash: impl Into<String>,
        body: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
            hash: hash.into(),
            body,
        }
    }

    pub fn identifier(&self) -> DataObjectIdentifier {
        DataObjectIdentifier::new(&self.id, &self.partition_key)
    }
}
