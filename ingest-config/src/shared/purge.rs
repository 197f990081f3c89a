use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;
use crate::shared::base::ensure_percentage;

/// Limits applied by the purge sanity check.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PurgeConfig {
    /// Largest share of stored documents, in percent, a single batch may delete.
    #[serde(default = "default_max_delete_percent")]
    pub max_delete_percent: u32,
    /// Per object type overrides of [`PurgeConfig::max_delete_percent`].
    #[serde(default)]
    pub per_type: HashMap<String, u32>,
}

impl PurgeConfig {
    pub const DEFAULT_MAX_DELETE_PERCENT: u32 = 100;

    /// Returns the limit for `object_type_name`, falling back to the global limit.
    pub fn max_delete_percent_for(&self, object_type_name: &str) -> u32 {
        self.per_type
            .get(object_type_name)
            .copied()
            .unwrap_or(self.max_delete_percent)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_percentage("purge.max_delete_percent", self.max_delete_percent)?;

        for (object_type_name, percent) in &self.per_type {
            ensure_percentage(
                &format!("purge.per_type.{object_type_name}"),
                *percent,
            )?;
        }

        Ok(())
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            max_delete_percent: default_max_delete_percent(),
            per_type: HashMap::new(),
        }
    }
}

fn default_max_delete_percent() -> u32 {
    PurgeConfig::DEFAULT_MAX_DELETE_PERCENT
}
