//! Periodic removal of leftover bookkeeping, expired payloads and expired soft deletes.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use ingest_config::shared::IngestConfig;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::concurrency::bounded::map_bounded;
use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::metrics::INGEST_HOUSEKEEPING_REMOVED_TOTAL;
use crate::store::document::{DocumentField, DocumentFilter, DocumentStore};
use crate::store::payload::PayloadSource;
use crate::store::table::TableStore;
use crate::types::{ChangeMessage, DocumentStatus, PayloadLocation, SegmentMessage};

/// What a [`Housekeeper::sweep`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub temporary_rows_removed: u64,
    pub payloads_removed: u64,
    pub history_rows_removed: u64,
    pub soft_deleted_documents_purged: u64,
}

#[derive(Debug, Clone)]
pub struct Housekeeper<T, D, P> {
    tables: T,
    documents: D,
    payloads: P,
    config: Arc<IngestConfig>,
}

impl<T, D, P> Housekeeper<T, D, P>
where
    T: TableStore,
    D: DocumentStore,
    P: PayloadSource,
{
    pub fn new(tables: T, documents: D, payloads: P, config: Arc<IngestConfig>) -> Self {
        Self {
            tables,
            documents,
            payloads,
            config,
        }
    }

    /// Runs every sweep once.
    ///
    /// Payloads go before the history tables, the handled rows are what locates them.
    pub async fn sweep(&self) -> IngestResult<SweepReport> {
        let report = SweepReport {
            temporary_rows_removed: self.sweep_temporary_tables().await?,
            payloads_removed: self.purge_payloads().await?,
            history_rows_removed: self.sweep_history_tables().await?,
            soft_deleted_documents_purged: self.purge_soft_deleted().await?,
        };

        info!(
            temporary_rows = report.temporary_rows_removed,
            payloads = report.payloads_removed,
            history_rows = report.history_rows_removed,
            soft_deleted_documents = report.soft_deleted_documents_purged,
            "housekeeping sweep completed"
        );

        Ok(report)
    }

    /// Removes rows batches should have cleaned up themselves.
    async fn sweep_temporary_tables(&self) -> IngestResult<u64> {
        let mut removed = 0;

        for table in self.config.tables.temporary_tables() {
            let count = self
                .tables
                .delete_older_than(table, self.config.retention.temporary())
                .await?;

            if count > 0 {
                warn!(
                    table,
                    rows = count,
                    "removed rows from temporary table, the table was not cleaned up after its batch"
                );
            } else {
                debug!(table, "temporary table is clean");
            }

            removed += count;
        }

        self.record_removed("temporary_rows", removed);

        Ok(removed)
    }

    /// Deletes the payloads of segments and changes handled longer ago than the history
    /// retention.
    async fn purge_payloads(&self) -> IngestResult<u64> {
        let age = self.config.retention.history();

        let mut locations: Vec<PayloadLocation> = self
            .tables
            .list_objects_older_than::<SegmentMessage>(&self.config.tables.batches_handled, age)
            .await?
            .into_iter()
            .filter_map(|message| message.payload)
            .collect();
        locations.extend(
            self.tables
                .list_objects_older_than::<ChangeMessage>(&self.config.tables.changes_handled, age)
                .await?
                .into_iter()
                .map(|message| message.payload),
        );

        let deleted = map_bounded(
            locations,
            self.config.batch.max_parallel_tasks,
            |location| async move {
                match self.payloads.delete(&location).await {
                    Ok(existed) => Ok(existed),
                    Err(err) => {
                        warn!(
                            %location,
                            error = %err,
                            "could not delete payload, it was probably moved already"
                        );
                        Ok(false)
                    }
                }
            },
        )
        .await?;
        let removed = deleted.into_iter().filter(|existed| *existed).count() as u64;
        debug!(payloads = removed, "removed expired payloads");

        self.record_removed("payloads", removed);

        Ok(removed)
    }

    async fn sweep_history_tables(&self) -> IngestResult<u64> {
        let mut removed = 0;

        for table in self.config.tables.history_tables() {
            let count = self
                .tables
                .delete_older_than(table, self.config.retention.history())
                .await?;
            debug!(table, rows = count, "removed rows from history table");

            removed += count;
        }

        self.record_removed("history_rows", removed);

        Ok(removed)
    }

    /// Permanently deletes documents soft deleted longer ago than the retention period.
    async fn purge_soft_deleted(&self) -> IngestResult<u64> {
        let retention = TimeDelta::from_std(self.config.retention.soft_deleted()).map_err(|err| {
            ingest_error!(
                ErrorKind::ConfigError,
                "Soft delete retention is out of range",
                err
            )
        })?;
        let filter = DocumentFilter::new()
            .eq(DocumentField::Status, DocumentStatus::SoftDeleted)
            .lt(DocumentField::LastUpdate, Utc::now() - retention);

        let mut purged = 0;
        for object_type_name in self.documents.object_type_names().await? {
            let expired = self
                .documents
                .get_identifiers(&object_type_name, &filter, None)
                .await?;

            let deleted = map_bounded(
                expired,
                self.config.batch.max_parallel_tasks,
                |identifier| {
                    let object_type_name = &object_type_name;
                    async move { self.documents.delete(object_type_name, &identifier).await }
                },
            )
            .await?;
            let count = deleted.into_iter().filter(|existed| *existed).count() as u64;
            debug!(
                object_type = %object_type_name,
                documents = count,
                "purged soft deleted documents"
            );

            purged += count;
        }

        self.record_removed("soft_deleted_documents", purged);

        Ok(purged)
    }

    fn record_removed(&self, kind: &'static str, count: u64) {
        counter!(INGEST_HOUSEKEEPING_REMOVED_TOTAL, "kind" => kind).increment(count);
    }
}
