use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{
    BatchConfig, DocumentConfig, PurgeConfig, QueueConfig, RetentionConfig, TableConfig,
    ValidationError,
};

/// Complete configuration of an ingestion deployment.
///
/// Every section has defaults, so an empty base file yields a working configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IngestConfig {
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub tables: TableConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub documents: DocumentConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl IngestConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.queues.validate()?;
        self.batch.validate()?;
        self.purge.validate()?;
        self.retention.validate()?;

        Ok(())
    }
}

impl Config for IngestConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
