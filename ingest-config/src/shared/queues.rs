use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Names of the queues each stage consumes, plus the outbound change topic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct QueueConfig {
    pub receive_full_batch: String,
    pub purge_plan: String,
    pub purge_execute: String,
    pub broadcast: String,
    pub cleanup: String,
    pub abort: String,
    /// Queue carrying incremental change events.
    pub receive_change: String,
    /// Topic receiving outbound change notifications, labelled with the object type name.
    pub change_topic: String,
}

impl QueueConfig {
    /// Validates that every queue has a name and that no two consumers share a queue.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let consumed = [
            ("queues.receive_full_batch", &self.receive_full_batch),
            ("queues.purge_plan", &self.purge_plan),
            ("queues.purge_execute", &self.purge_execute),
            ("queues.broadcast", &self.broadcast),
            ("queues.cleanup", &self.cleanup),
            ("queues.abort", &self.abort),
            ("queues.receive_change", &self.receive_change),
        ];

        let mut seen = HashSet::new();
        for (field, name) in consumed {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: field.to_string(),
                    constraint: "must not be empty".to_string(),
                });
            }

            if !seen.insert(name.as_str()) {
                return Err(ValidationError::DuplicateQueueName(name.clone()));
            }
        }

        if self.change_topic.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "queues.change_topic".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            receive_full_batch: "receive-fullbatch".to_string(),
            purge_plan: "purge-plan".to_string(),
            purge_execute: "purge-execute".to_string(),
            broadcast: "broadcast".to_string(),
            cleanup: "cleanup".to_string(),
            abort: "abort".to_string(),
            receive_change: "receive-change".to_string(),
            change_topic: "data-changes".to_string(),
        }
    }
}
