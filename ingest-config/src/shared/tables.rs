use serde::{Deserialize, Serialize};

/// Names of the coordination tables in the key/value table store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TableConfig {
    /// One lock candidate row per (object type, batch).
    pub lock_candidates: String,
    /// Batches that must never run again.
    pub canceled_batches: String,
    /// Per-segment execution records and per-stage completion records.
    pub execution_log: String,
    /// Identifiers that were present in a batch but did not change.
    pub unchanged_ids: String,
    /// Identifiers removed by the purge of a batch.
    pub deleted_ids: String,
    /// Received full batch segments.
    pub batches_handled: String,
    /// Processed incremental changes.
    pub changes_handled: String,
}

impl TableConfig {
    /// Tables holding per-batch working data, swept after a short retention.
    pub fn temporary_tables(&self) -> [&str; 3] {
        [
            self.unchanged_ids.as_str(),
            self.deleted_ids.as_str(),
            self.lock_candidates.as_str(),
        ]
    }

    /// Tables holding audit history, swept after the history retention.
    pub fn history_tables(&self) -> [&str; 4] {
        [
            self.canceled_batches.as_str(),
            self.execution_log.as_str(),
            self.batches_handled.as_str(),
            self.changes_handled.as_str(),
        ]
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            lock_candidates: "ActiveBatches".to_string(),
            canceled_batches: "CanceledBatches".to_string(),
            execution_log: "ImportLogs".to_string(),
            unchanged_ids: "UnchangedIds".to_string(),
            deleted_ids: "DeletedIds".to_string(),
            batches_handled: "BatchesHandled".to_string(),
            changes_handled: "ChangesHandled".to_string(),
        }
    }
}
