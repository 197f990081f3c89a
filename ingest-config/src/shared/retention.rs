use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;
use crate::shared::base::ensure_non_zero;

/// Retention windows used by the housekeeping sweeps.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetentionConfig {
    /// Days to keep audit history rows.
    #[serde(default = "default_history_days")]
    pub history_days: u64,
    /// Hours to keep per-batch working rows.
    #[serde(default = "default_temporary_hours")]
    pub temporary_hours: u64,
    /// Days to keep soft-deleted documents before they are purged.
    #[serde(default = "default_soft_deleted_days")]
    pub soft_deleted_days: u64,
}

impl RetentionConfig {
    pub const DEFAULT_HISTORY_DAYS: u64 = 14;
    pub const DEFAULT_TEMPORARY_HOURS: u64 = 24;
    pub const DEFAULT_SOFT_DELETED_DAYS: u64 = 14;

    pub fn history(&self) -> Duration {
        Duration::from_secs(self.history_days * 24 * 60 * 60)
    }

    pub fn temporary(&self) -> Duration {
        Duration::from_secs(self.temporary_hours * 60 * 60)
    }

    pub fn soft_deleted(&self) -> Duration {
        Duration::from_secs(self.soft_deleted_days * 24 * 60 * 60)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_non_zero("retention.history_days", self.history_days)?;
        ensure_non_zero("retention.temporary_hours", self.temporary_hours)?;
        ensure_non_zero("retention.soft_deleted_days", self.soft_deleted_days)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
            temporary_hours: default_temporary_hours(),
            soft_deleted_days: default_soft_deleted_days(),
        }
    }
}

fn default_history_days() -> u64 {
    RetentionConfig::DEFAULT_HISTORY_DAYS
}

fn default_temporary_hours() -> u64 {
    RetentionConfig::DEFAULT_TEMPORARY_HOURS
}

fn default_soft_deleted_days() -> u64 {
    RetentionConfig::DEFAULT_SOFT_DELETED_DAYS
}
