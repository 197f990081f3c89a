use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DataObjectIdentifier, PayloadLocation};

/// Kind of change applied to a set of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    AddOrUpdate,
    Delete,
    Patch,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::AddOrUpdate => "add_or_update",
            ChangeType::Delete => "delete",
            ChangeType::Patch => "patch",
        }
    }
}

/// Notification published on the change topic for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeMessage {
    pub object_type_name: String,
    pub batch_id: String,
    pub change_type: ChangeType,
    pub identifiers: Vec<DataObjectIdentifier>,
    pub created: DateTime<Utc>,
}

/// Incremental change received outside of full batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub object_type_name: String,
    pub batch_id: String,
    pub change_type: ChangeType,
    pub payload: PayloadLocation,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl ChangeMessage {
    /// Partition key of the row recording that this change was handled.
    pub fn change_key(&self) -> String {
        format!("{}_{}", self.object_type_name, self.batch_id)
    }
}
