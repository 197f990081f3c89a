//! Primary work and continuations of the pipeline stages.

use tracing::{debug, info, warn};

use crate::bail;
use crate::concurrency::bounded::for_each_bounded;
use crate::error::{ErrorKind, IngestResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{PIPELINE_BEFORE_FORWARD, ingest_fail_point};
use crate::metrics::MONITOR_TARGET;
use crate::pipeline::driver::BatchPipeline;
use crate::pipeline::purge::PurgePlan;
use crate::pipeline::stage::Stage;
use crate::store::document::{DocumentField, DocumentFilter, DocumentStore, SegmentSlice};
use crate::store::payload::PayloadSource;
use crate::store::queue::MessageQueue;
use crate::store::table::TableStore;
use crate::types::{
    ABORTED_HASH_MARK, ChangeType, DataObjectIdentifier, DocumentStatus, SegmentMessage,
};

/// Active documents that were not written by `batch_id`.
fn not_upserted_by(batch_id: &str) -> DocumentFilter {
    DocumentFilter::new()
        .ne(DocumentField::BatchId, batch_id)
        .eq(DocumentField::Status, DocumentStatus::Active)
}

impl<T, Q, D, P> BatchPipeline<T, Q, D, P>
where
    T: TableStore + Clone,
    Q: MessageQueue + Clone,
    D: DocumentStore + Clone,
    P: PayloadSource,
{
    pub(super) async fn run_stage(&self, stage: Stage, message: &SegmentMessage) -> IngestResult<()> {
        match stage {
            Stage::ReceiveFullBatch => self.receive(message).await,
            Stage::PurgePlan => self.plan_purge(message).await,
            Stage::PurgeExecute => self.execute_purge(message).await,
            Stage::Broadcast => self.broadcast_changes(message).await,
            Stage::Cleanup => self.clean_up(message).await,
            Stage::Abort => self.abort(message).await,
        }
    }

    pub(super) async fn continue_stage(
        &self,
        stage: Stage,
        message: &SegmentMessage,
    ) -> IngestResult<()> {
        match stage {
            Stage::ReceiveFullBatch => {
                self.locks.assert_still_held(&message.identity()).await?;
                self.forward(message, Stage::PurgePlan).await
            }
            // Purge planning enqueues its successors itself.
            Stage::PurgePlan => Ok(()),
            Stage::PurgeExecute => {
                self.locks.assert_still_held(&message.identity()).await?;
                self.forward(message, Stage::Broadcast).await
            }
            Stage::Broadcast => {
                self.locks.assert_still_held(&message.identity()).await?;
                self.forward(message, Stage::Cleanup).await
            }
            Stage::Cleanup => Ok(()),
            Stage::Abort => {
                info!(
                    object_type = %message.object_type_name,
                    batch_id = %message.batch_id,
                    "all documents written by the batch are marked aborted"
                );
                self.forward(message, Stage::Cleanup).await
            }
        }
    }

    /// Imports the payload of one segment.
    async fn receive(&self, message: &SegmentMessage) -> IngestResult<()> {
        if message.segment == 1 {
            info!(
                target: MONITOR_TARGET,
                object_type = %message.object_type_name,
                batch_id = %message.batch_id,
                segments_total = message.segments_total,
                "starting raw data import batch"
            );
        }

        let Some(location) = &message.payload else {
            bail!(
                ErrorKind::InvalidMessage,
                "Full batch message has no payload location",
                message.batch_key()
            );
        };

        let records = self.payloads.load(location).await?;
        let outcome = self
            .ingestor
            .upsert_changes(&message.object_type_name, &message.batch_id, records)
            .await?;

        let batch_key = message.batch_key();
        let unchanged_table = &self.config.tables.unchanged_ids;
        for_each_bounded(
            outcome.unchanged,
            self.config.batch.max_parallel_tasks,
            |identifier| {
                let batch_key = &batch_key;
                async move {
                    self.tables
                        .upsert_object(
                            unchanged_table,
                            batch_key,
                            &identifier.to_key_string(),
                            &identifier,
                        )
                        .await
                }
            },
        )
        .await?;

        self.tables
            .upsert_object(
                &self.config.tables.batches_handled,
                &batch_key,
                &message.segment.to_string(),
                message,
            )
            .await
    }

    /// Sizes the purge of documents missing from the batch and fans it out.
    async fn plan_purge(&self, message: &SegmentMessage) -> IngestResult<()> {
        let object_type_name = &message.object_type_name;
        let batch_key = message.batch_key();

        let not_upserted = self
            .documents
            .count(object_type_name, Some(&not_upserted_by(&message.batch_id)))
            .await?;
        let unchanged = self
            .tables
            .list_row_keys(&self.config.tables.unchanged_ids, &batch_key)
            .await?
            .len() as u64;
        let total = self.documents.count(object_type_name, None).await?;

        let plan = PurgePlan::new(
            not_upserted,
            unchanged,
            total,
            self.config.batch.max_tasks_per_message,
        );
        plan.check(
            self.config.purge.max_delete_percent_for(object_type_name),
            object_type_name,
        )?;

        if plan.tasks == 0 {
            info!(
                object_type = %object_type_name,
                batch_id = %message.batch_id,
                "no documents to purge, moving on to broadcast"
            );
            return self.forward(message, Stage::Broadcast).await;
        }

        info!(
            object_type = %object_type_name,
            batch_id = %message.batch_id,
            to_delete = plan.to_delete,
            tasks = plan.tasks,
            max_per_task = self.config.batch.max_tasks_per_message,
            "fanning out purge tasks"
        );

        let batch = message.identity();
        let queue_name = Stage::PurgeExecute.queue_name(&self.config.queues);
        for_each_bounded(1..=plan.tasks, self.config.batch.max_parallel_tasks, |segment| {
            let purge = SegmentMessage::new(&batch, segment, plan.tasks);
            async move { self.queue.enqueue_json(queue_name, &purge).await }
        })
        .await?;

        debug!(tasks = plan.tasks, "enqueued purge tasks");

        Ok(())
    }

    /// Deletes the documents of one slice that are neither written by the batch nor unchanged.
    async fn execute_purge(&self, message: &SegmentMessage) -> IngestResult<()> {
        let object_type_name = &message.object_type_name;
        let batch_key = message.batch_key();
        let slice = SegmentSlice {
            index: message.segment - 1,
            total: message.segments_total,
        };

        let candidates = self
            .documents
            .get_identifiers(
                object_type_name,
                &not_upserted_by(&message.batch_id),
                Some(slice),
            )
            .await?;
        let candidate_count = candidates.len();

        let tables = &self.config.tables;
        for_each_bounded(
            candidates,
            self.config.batch.max_parallel_resource_intensive_tasks,
            |identifier| {
                let batch_key = &batch_key;
                async move {
                    let row_key = identifier.to_key_string();
                    if self
                        .tables
                        .exists(&tables.unchanged_ids, batch_key, &row_key)
                        .await?
                    {
                        return Ok(());
                    }

                    self.ingestor
                        .delete(object_type_name, &identifier, &message.batch_id)
                        .await?;
                    self.tables
                        .upsert_object(&tables.deleted_ids, batch_key, &row_key, &identifier)
                        .await
                }
            },
        )
        .await?;

        info!(
            object_type = %object_type_name,
            batch_id = %message.batch_id,
            segment = message.segment,
            segments_total = message.segments_total,
            candidates = candidate_count,
            "purged stale documents"
        );

        Ok(())
    }

    /// Notifies subscribers of every document the batch wrote or deleted.
    async fn broadcast_changes(&self, message: &SegmentMessage) -> IngestResult<()> {
        let batch = message.identity();

        let written_by_batch = DocumentFilter::new()
            .eq(DocumentField::BatchId, message.batch_id.as_str())
            .eq(DocumentField::Status, DocumentStatus::Active);
        let upserted = self
            .documents
            .get_identifiers(&message.object_type_name, &written_by_batch, None)
            .await?;
        let upserted_count = self
            .broadcaster
            .broadcast(&batch, upserted, ChangeType::AddOrUpdate)
            .await?;

        let deleted = self
            .tables
            .list_row_keys(&self.config.tables.deleted_ids, &message.batch_key())
            .await?
            .iter()
            .map(|row_key| DataObjectIdentifier::from_key_string(row_key))
            .collect::<IngestResult<Vec<_>>>()?;
        let deleted_count = self
            .broadcaster
            .broadcast(&batch, deleted, ChangeType::Delete)
            .await?;

        info!(
            target: MONITOR_TARGET,
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            upserted = upserted_count,
            deleted = deleted_count,
            "completed raw data import batch"
        );

        Ok(())
    }

    /// Removes the temporary rows of the batch and frees the type lock.
    ///
    /// The lock is released even when removing the rows fails.
    async fn clean_up(&self, message: &SegmentMessage) -> IngestResult<()> {
        let cleared = self.clear_temporary_rows(message).await;
        let released = self.locks.release(&message.identity(), false).await;
        cleared?;
        released?;

        info!(
            target: MONITOR_TARGET,
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            "batch COMPLETED"
        );

        Ok(())
    }

    async fn clear_temporary_rows(&self, message: &SegmentMessage) -> IngestResult<()> {
        let batch_key = message.batch_key();

        for table in [
            &self.config.tables.unchanged_ids,
            &self.config.tables.deleted_ids,
        ] {
            let row_keys = self.tables.list_row_keys(table, &batch_key).await?;
            debug!(table = %table, rows = row_keys.len(), "clearing temporary rows");

            for_each_bounded(row_keys, self.config.batch.max_parallel_tasks, |row_key| {
                let batch_key = &batch_key;
                async move {
                    self.tables.delete(table, batch_key, &row_key).await?;
                    Ok(())
                }
            })
            .await?;
        }

        Ok(())
    }

    /// Marks every document written by the batch as aborted.
    ///
    /// The hash gets [`ABORTED_HASH_MARK`] appended, so the next batch rewrites the document, and
    /// documents the batch soft deleted become active again.
    async fn abort(&self, message: &SegmentMessage) -> IngestResult<()> {
        let object_type_name = &message.object_type_name;
        let touched = DocumentFilter::new().eq(DocumentField::BatchId, message.batch_id.as_str());

        let documents = self
            .documents
            .get_documents(object_type_name, &touched)
            .await?;
        let touched_count = documents.len();

        for_each_bounded(
            documents,
            self.config.batch.max_parallel_resource_intensive_tasks,
            |mut document| async move {
                if document.is_marked_aborted() {
                    return Ok(());
                }

                document.hash.push_str(ABORTED_HASH_MARK);
                if document.status == DocumentStatus::SoftDeleted {
                    document.status = DocumentStatus::Active;
                }

                self.documents.upsert(object_type_name, document).await
            },
        )
        .await?;

        warn!(
            target: MONITOR_TARGET,
            object_type = %object_type_name,
            batch_id = %message.batch_id,
            documents = touched_count,
            "batch aborted"
        );

        Ok(())
    }

    /// Starts `next` for the batch of `message` with a single segment.
    async fn forward(&self, message: &SegmentMessage, next: Stage) -> IngestResult<()> {
        #[cfg(feature = "failpoints")]
        ingest_fail_point(PIPELINE_BEFORE_FORWARD)?;

        let queue_name = next.queue_name(&self.config.queues);
        info!(
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            queue = queue_name,
            "forwarding batch to next stage"
        );

        self.queue
            .enqueue_json(queue_name, &SegmentMessage::forwarded(&message.identity()))
            .await
    }
}
