use std::sync::Arc;

use ingest_config::shared::IngestConfig;
use tracing::{debug, error, info};

use crate::broadcast::ChangeBroadcaster;
use crate::concurrency::bounded::for_each_bounded;
use crate::error::IngestResult;
use crate::ingestor::RecordIngestor;
use crate::metrics::MONITOR_TARGET;
use crate::store::document::DocumentStore;
use crate::store::payload::PayloadSource;
use crate::store::queue::MessageQueue;
use crate::store::table::TableStore;
use crate::types::{BatchIdentity, ChangeMessage, ChangeType, DataObjectIdentifier};

/// Applies incremental changes received outside of full batches.
///
/// Changes do not take the type lock and are not deduplicated. Applying the same change twice
/// leaves the store unchanged, the second delivery only broadcasts again.
#[derive(Debug, Clone)]
pub struct ChangeHandler<T, Q, D, P> {
    tables: T,
    payloads: P,
    ingestor: RecordIngestor<D>,
    broadcaster: ChangeBroadcaster<Q>,
    config: Arc<IngestConfig>,
}

impl<T, Q, D, P> ChangeHandler<T, Q, D, P>
where
    T: TableStore,
    Q: MessageQueue,
    D: DocumentStore,
    P: PayloadSource,
{
    pub fn new(tables: T, queue: Q, documents: D, payloads: P, config: Arc<IngestConfig>) -> Self {
        Self {
            tables,
            payloads,
            ingestor: RecordIngestor::new(documents, config.clone()),
            broadcaster: ChangeBroadcaster::new(queue, config.clone()),
            config,
        }
    }

    /// Decodes and applies a change message.
    pub async fn handle_message(&self, body: &str) -> IngestResult<()> {
        let message: ChangeMessage = match serde_json::from_str(body) {
            Ok(message) => message,
            Err(err) => {
                error!(
                    target: MONITOR_TARGET,
                    body,
                    error = %err,
                    "cannot deserialize change message"
                );
                return Err(err.into());
            }
        };

        if let Err(err) = self.apply(&message).await {
            error!(
                target: MONITOR_TARGET,
                object_type = %message.object_type_name,
                batch_id = %message.batch_id,
                change_type = message.change_type.as_str(),
                error = %err,
                "change failed"
            );
            return Err(err);
        }

        Ok(())
    }

    /// Applies `message` and records it as handled. Returns the number of broadcast identifiers.
    pub async fn apply(&self, message: &ChangeMessage) -> IngestResult<usize> {
        debug!(
            change_key = %message.change_key(),
            change_type = message.change_type.as_str(),
            "processing change message"
        );

        let object_type_name = &message.object_type_name;
        let batch_id = &message.batch_id;
        let batch = BatchIdentity::new(object_type_name, batch_id);
        let records = self.payloads.load(&message.payload).await?;

        let affected = match message.change_type {
            ChangeType::AddOrUpdate => {
                let outcome = self
                    .ingestor
                    .upsert_changes(object_type_name, batch_id, records)
                    .await?;
                let affected = self
                    .broadcaster
                    .broadcast(&batch, outcome.changed, ChangeType::AddOrUpdate)
                    .await?;

                info!(
                    target: MONITOR_TARGET,
                    object_type = %object_type_name,
                    batch_id = %batch_id,
                    upserted = affected,
                    "upserted raw objects"
                );
                affected
            }
            ChangeType::Delete => {
                let identifiers: Vec<DataObjectIdentifier> =
                    records.iter().map(|record| record.identifier()).collect();

                for_each_bounded(
                    identifiers.clone(),
                    self.config.batch.max_parallel_tasks,
                    |identifier| async move {
                        self.ingestor
                            .delete(object_type_name, &identifier, batch_id)
                            .await?;
                        Ok(())
                    },
                )
                .await?;

                let affected = self
                    .broadcaster
                    .broadcast(&batch, identifiers, ChangeType::Delete)
                    .await?;

                info!(
                    target: MONITOR_TARGET,
                    object_type = %object_type_name,
                    batch_id = %batch_id,
                    deleted = affected,
                    "deleted raw objects"
                );
                affected
            }
            ChangeType::Patch => {
                let patched = self
                    .ingestor
                    .patch(object_type_name, batch_id, records)
                    .await?;
                let affected = self
                    .broadcaster
                    .broadcast(&batch, patched, ChangeType::AddOrUpdate)
                    .await?;

                info!(
                    target: MONITOR_TARGET,
                    object_type = %object_type_name,
                    batch_id = %batch_id,
                    patched = affected,
                    "completed patch of raw objects"
                );
                affected
            }
        };

        self.tables
            .upsert_object(
                &self.config.tables.changes_handled,
                &message.change_key(),
                message.change_type.as_str(),
                message,
            )
            .await?;

        Ok(affected)
    }
}
