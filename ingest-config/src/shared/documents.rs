use serde::{Deserialize, Serialize};

/// Document store behavior.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DocumentConfig {
    /// When `true`, deletes mark documents as soft-deleted instead of removing them. Soft-deleted
    /// documents are purged later by the housekeeping sweep.
    #[serde(default)]
    pub soft_delete: bool,
}
