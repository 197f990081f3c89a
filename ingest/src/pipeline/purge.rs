use crate::bail;
use crate::error::{ErrorKind, IngestResult};

/// Size of the purge of stale documents after a batch was received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurgePlan {
    /// Active documents not written by the batch.
    pub not_upserted: u64,
    /// Documents contained in the batch whose content did not change.
    pub unchanged: u64,
    /// Documents of the object type.
    pub total: u64,
    pub to_delete: u64,
    pub to_delete_percent: f64,
    /// Number of purge-execute segments to fan out.
    pub tasks: u32,
}

impl PurgePlan {
    pub fn new(not_upserted: u64, unchanged: u64, total: u64, max_tasks_per_message: usize) -> Self {
        let to_delete = not_upserted.saturating_sub(unchanged);
        let to_delete_percent = if total == 0 {
            0.0
        } else {
            to_delete as f64 / total as f64 * 100.0
        };

        let per_message = max_tasks_per_message.max(1) as u64;
        let by_delete_count = to_delete as f64 / per_message as f64;
        let by_candidate_count = (not_upserted / (per_message * 10)) as f64;
        let tasks = by_delete_count.max(by_candidate_count).ceil() as u32;

        Self {
            not_upserted,
            unchanged,
            total,
            to_delete,
            to_delete_percent,
            tasks,
        }
    }

    /// Fails with [`ErrorKind::DeleteSanityCheckFailed`] when the plan deletes a larger share of
    /// the documents than `max_delete_percent`.
    pub fn check(&self, max_delete_percent: u32, object_type_name: &str) -> IngestResult<()> {
        if self.to_delete_percent > f64::from(max_delete_percent) {
            bail!(
                ErrorKind::DeleteSanityCheckFailed,
                "Delete sanity check failed",
                format!(
                    "The batch would delete {:.1}% ({} of {}) of the {} objects, the maximum is \
                     {}%. Raise purge.max_delete_percent or purge.per_type.{} to allow it",
                    self.to_delete_percent,
                    self.to_delete,
                    self.total,
                    object_type_name,
                    max_delete_percent,
                    object_type_name
                )
            );
        }

        Ok(())
    }
}
