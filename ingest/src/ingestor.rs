//! Writes incoming records into the document store.
//!
//! Records are compared with the stored documents by hash, so unchanged records are never
//! rewritten. Every written document is stamped active, tagged with the writing batch and the
//! import time.

use std::sync::Arc;

use chrono::Utc;
use ingest_config::shared::IngestConfig;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::concurrency::bounded::{for_each_bounded, map_bounded};
use crate::error::IngestResult;
use crate::store::document::DocumentStore;
use crate::types::{DataObjectIdentifier, Document, DocumentStatus, IncomingRecord};

/// Identifiers of an upsert, split by whether the record had to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub changed: Vec<DataObjectIdentifier>,
    pub unchanged: Vec<DataObjectIdentifier>,
}

#[derive(Debug, Clone)]
pub struct RecordIngestor<D> {
    documents: D,
    config: Arc<IngestConfig>,
}

impl<D> RecordIngestor<D>
where
    D: DocumentStore,
{
    pub fn new(documents: D, config: Arc<IngestConfig>) -> Self {
        Self { documents, config }
    }

    /// Upserts new and changed records, in chunks of `max_in_memory_objects`.
    ///
    /// A record is unchanged when an active document with the same identifier and hash exists.
    pub async fn upsert_changes(
        &self,
        object_type_name: &str,
        batch_id: &str,
        records: Vec<IncomingRecord>,
    ) -> IngestResult<UpsertOutcome> {
        let chunk_size = self.config.batch.max_in_memory_objects.max(1);
        let parallelism = self.config.batch.max_parallel_resource_intensive_tasks;
        let total = records.len();

        let mut outcome = UpsertOutcome::default();
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let chunk: Vec<IncomingRecord> = records.by_ref().take(chunk_size).collect();

            let lookups: Vec<(DataObjectIdentifier, String)> = chunk
                .iter()
                .map(|record| (record.identifier(), record.hash.clone()))
                .collect();
            let unchanged_flags =
                map_bounded(lookups, parallelism, |(identifier, hash)| async move {
                    let existing = self.documents.get(object_type_name, &identifier).await?;

                    Ok(existing.is_some_and(|document| {
                        document.status == DocumentStatus::Active && document.hash == hash
                    }))
                })
                .await?;

            let mut changed = Vec::new();
            for (record, unchanged) in chunk.into_iter().zip(unchanged_flags) {
                if unchanged {
                    outcome.unchanged.push(record.identifier());
                } else {
                    changed.push(record);
                }
            }

            debug!(
                object_type = object_type_name,
                changed = changed.len(),
                "upserting chunk of records"
            );

            let now = Utc::now();
            outcome
                .changed
                .extend(changed.iter().map(IncomingRecord::identifier));
            for_each_bounded(changed, parallelism, |record| async move {
                let document = Document::from_record(record, batch_id, now);
                self.documents.upsert(object_type_name, document).await
            })
            .await?;
        }

        info!(
            object_type = object_type_name,
            batch_id,
            total,
            upserted = outcome.changed.len(),
            unchanged = outcome.unchanged.len(),
            "import of records completed"
        );

        Ok(outcome)
    }

    /// Deletes a document, or marks it soft deleted by `batch_id` when soft deletes are enabled.
    ///
    /// Returns whether a document was found.
    pub async fn delete(
        &self,
        object_type_name: &str,
        identifier: &DataObjectIdentifier,
        batch_id: &str,
    ) -> IngestResult<bool> {
        if !self.config.documents.soft_delete {
            return self.documents.delete(object_type_name, identifier).await;
        }

        let Some(mut document) = self.documents.get(object_type_name, identifier).await? else {
            return Ok(false);
        };

        document.status = DocumentStatus::SoftDeleted;
        document.batch_id = batch_id.to_string();
        document.last_update = Utc::now();
        self.documents.upsert(object_type_name, document).await?;

        Ok(true)
    }

    /// Merges each patch record over its stored document and returns the identifiers of the
    /// documents that changed.
    ///
    /// Fields missing from a patch keep their stored value. A patch for a document that does not
    /// exist is written as a new document.
    pub async fn patch(
        &self,
        object_type_name: &str,
        batch_id: &str,
        records: Vec<IncomingRecord>,
    ) -> IngestResult<Vec<DataObjectIdentifier>> {
        let total = records.len();
        let parallelism = self.config.batch.max_parallel_tasks;

        let patched = map_bounded(records, parallelism, |record| async move {
            let identifier = record.identifier();
            let stored = self.documents.get(object_type_name, &identifier).await?;

            let (body, has_changes) = match stored {
                Some(stored) => merge_patch(record.body.clone(), &stored.body),
                None => (record.body.clone(), true),
            };
            if !has_changes {
                return Ok(None);
            }

            let patched = IncomingRecord { body, ..record };
            let document = Document::from_record(patched, batch_id, Utc::now());
            self.documents.upsert(object_type_name, document).await?;

            Ok(Some(identifier))
        })
        .await?;

        let patched: Vec<DataObjectIdentifier> = patched.into_iter().flatten().collect();

        info!(
            object_type = object_type_name,
            batch_id,
            total,
            patched = patched.len(),
            unchanged = total - patched.len(),
            "patch of records completed"
        );

        Ok(patched)
    }
}

/// Fills fields missing from `patch` with their stored value. Reports a change when the patch
/// adds a field or alters a stored one.
fn merge_patch(
    mut patch: Map<String, Value>,
    stored: &Map<String, Value>,
) -> (Map<String, Value>, bool) {
    let mut has_changes = patch.keys().any(|key| !stored.contains_key(key));

    for (key, stored_value) in stored {
        match patch.get(key) {
            Some(value) => has_changes = has_changes || value != stored_value,
            None => {
                patch.insert(key.clone(), stored_value.clone());
            }
        }
    }

    (patch, has_changes)
}
