use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;
use crate::shared::base::ensure_non_zero;

/// Timing, fan-out and failure settings shared by every batch stage.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Age, in seconds, after which a lock held by another batch is considered stale and reaped.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    /// Age, in seconds, after which a message denied the lock is dropped instead of rescheduled.
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,
    /// Time, in milliseconds, a contender waits after writing its lock candidate before re-reading
    /// all candidates.
    #[serde(default = "default_lock_settle_ms")]
    pub lock_settle_ms: u64,
    /// Maximum number of concurrent store or queue calls in a bulk fan-out.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Maximum number of concurrent document store calls in a bulk fan-out.
    #[serde(default = "default_max_parallel_resource_intensive_tasks")]
    pub max_parallel_resource_intensive_tasks: usize,
    /// Maximum number of identifiers carried by a single outbound message.
    #[serde(default = "default_max_tasks_per_message")]
    pub max_tasks_per_message: usize,
    /// Maximum number of records held in memory while detecting changes.
    #[serde(default = "default_max_in_memory_objects")]
    pub max_in_memory_objects: usize,
    /// When `true`, an unexpected stage failure cancels the batch instead of only releasing its
    /// lock.
    #[serde(default)]
    pub cancel_on_exception: bool,
}

impl BatchConfig {
    pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 2 * 60 * 60;
    pub const DEFAULT_MESSAGE_TTL_SECS: u64 = 24 * 60 * 60;
    pub const DEFAULT_LOCK_SETTLE_MS: u64 = 750;
    pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 32;
    pub const DEFAULT_MAX_PARALLEL_RESOURCE_INTENSIVE_TASKS: usize = 8;
    pub const DEFAULT_MAX_TASKS_PER_MESSAGE: usize = 500;
    pub const DEFAULT_MAX_IN_MEMORY_OBJECTS: usize = 1000;

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    pub fn lock_settle_interval(&self) -> Duration {
        Duration::from_millis(self.lock_settle_ms)
    }

    /// Validates batch settings.
    ///
    /// Parallelism and chunk sizes must be non-zero. A zero settle interval is allowed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_non_zero("batch.batch_timeout_secs", self.batch_timeout_secs)?;
        ensure_non_zero("batch.max_parallel_tasks", self.max_parallel_tasks as u64)?;
        ensure_non_zero(
            "batch.max_parallel_resource_intensive_tasks",
            self.max_parallel_resource_intensive_tasks as u64,
        )?;
        ensure_non_zero(
            "batch.max_tasks_per_message",
            self.max_tasks_per_message as u64,
        )?;
        ensure_non_zero(
            "batch.max_in_memory_objects",
            self.max_in_memory_objects as u64,
        )?;

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_timeout_secs: default_batch_timeout_secs(),
            message_ttl_secs: default_message_ttl_secs(),
            lock_settle_ms: default_lock_settle_ms(),
            max_parallel_tasks: default_max_parallel_tasks(),
            max_parallel_resource_intensive_tasks: default_max_parallel_resource_intensive_tasks(),
            max_tasks_per_message: default_max_tasks_per_message(),
            max_in_memory_objects: default_max_in_memory_objects(),
            cancel_on_exception: false,
        }
    }
}

fn default_batch_timeout_secs() -> u64 {
    BatchConfig::DEFAULT_BATCH_TIMEOUT_SECS
}

fn default_message_ttl_secs() -> u64 {
    BatchConfig::DEFAULT_MESSAGE_TTL_SECS
}

fn default_lock_settle_ms() -> u64 {
    BatchConfig::DEFAULT_LOCK_SETTLE_MS
}

fn default_max_parallel_tasks() -> usize {
    BatchConfig::DEFAULT_MAX_PARALLEL_TASKS
}

fn default_max_parallel_resource_intensive_tasks() -> usize {
    BatchConfig::DEFAULT_MAX_PARALLEL_RESOURCE_INTENSIVE_TASKS
}

fn default_max_tasks_per_message() -> usize {
    BatchConfig::DEFAULT_MAX_TASKS_PER_MESSAGE
}

fn default_max_in_memory_objects() -> usize {
    BatchConfig::DEFAULT_MAX_IN_MEMORY_OBJECTS
}
