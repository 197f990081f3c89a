use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use ingest_config::shared::IngestConfig;
use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::concurrency::settle::settle;
use crate::error::{ErrorKind, IngestResult};
use crate::lock::candidate::{CanceledBatchRecord, LockCandidate};
use crate::lock::schedule::next_delivery_time;
use crate::metrics::{
    INGEST_BATCHES_CANCELED_TOTAL, INGEST_LOCK_DENIED_TOTAL, MONITOR_TARGET, OBJECT_TYPE_LABEL,
};
use crate::store::queue::{MessageQueue, QueueMessage};
use crate::store::table::TableStore;
use crate::types::{BatchIdentity, SegmentMessage};

/// Result of [`TypeLockManager::acquire_or_contend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResult {
    pub granted: bool,
    /// `true` when this call created the lock, `false` for a re-grant or a denial.
    pub newly_created: bool,
}

impl LockResult {
    const DENIED: LockResult = LockResult {
        granted: false,
        newly_created: false,
    };
    const REGRANTED: LockResult = LockResult {
        granted: true,
        newly_created: false,
    };
    const CREATED: LockResult = LockResult {
        granted: true,
        newly_created: true,
    };
}

/// What [`TypeLockManager::handle_denied`] did with a message that lost contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedOutcome {
    /// The message was enqueued again for delivery at the given time.
    Rescheduled { at: DateTime<Utc> },
    /// The message outlived the message TTL and was dropped.
    Expired,
}

/// Mutual exclusion between batches of the same data object type.
///
/// There is no central arbiter. A contender writes a candidate row, waits for the settle
/// interval so concurrent candidates become visible, then re-reads all candidates of the type
/// and resolves the contention deterministically, see [`LockCandidate::precedes`]. This holds as
/// long as clock skew between contenders stays below the settle interval.
#[derive(Debug, Clone)]
pub struct TypeLockManager<T, Q> {
    tables: T,
    queue: Q,
    config: Arc<IngestConfig>,
}

impl<T, Q> TypeLockManager<T, Q>
where
    T: TableStore,
    Q: MessageQueue,
{
    pub fn new(tables: T, queue: Q, config: Arc<IngestConfig>) -> Self {
        Self {
            tables,
            queue,
            config,
        }
    }

    /// Grants the type lock to the batch of `message` or reports contention.
    ///
    /// Fails with [`ErrorKind::BatchCanceled`] when the batch was canceled. A lock held longer
    /// than the batch timeout is reaped: its batch is canceled and aborted, and the caller
    /// contends for the freed lock.
    pub async fn acquire_or_contend(&self, message: &SegmentMessage) -> IngestResult<LockResult> {
        let batch = message.identity();

        if self.is_canceled(&batch).await? {
            bail!(
                ErrorKind::BatchCanceled,
                "Batch was canceled",
                format!("Batch {batch} is not allowed to run anymore")
            );
        }

        let candidates = self.candidates(&batch.object_type_name).await?;

        if candidates
            .iter()
            .any(|candidate| candidate.batch_id == batch.batch_id)
        {
            return Ok(LockResult::REGRANTED);
        }

        let current = candidates
            .iter()
            .find(|candidate| candidate.has_lock)
            .or_else(|| candidates.iter().min_by_key(|candidate| candidate.created));

        if let Some(current) = current {
            if !current.is_stale(Utc::now(), self.config.batch.batch_timeout()) {
                self.record_denied(&batch);
                return Ok(LockResult::DENIED);
            }

            warn!(
                object_type = %current.object_type_name,
                batch_id = %current.batch_id,
                timeout_secs = self.config.batch.batch_timeout_secs,
                "batch did not finish within the batch timeout and will be aborted"
            );
            self.release(&current.identity(), true).await?;
        }

        self.create_and_verify(message).await
    }

    async fn create_and_verify(&self, message: &SegmentMessage) -> IngestResult<LockResult> {
        let table = &self.config.tables.lock_candidates;
        let mut own = LockCandidate::from_message(message);

        self.tables
            .upsert_object(table, &own.object_type_name, &own.batch_id, &own)
            .await?;

        settle(self.config.batch.lock_settle_interval()).await;

        let candidates = self.candidates(&own.object_type_name).await?;
        let can_have_lock = candidates
            .iter()
            .filter(|candidate| candidate.batch_id != own.batch_id)
            .all(|other| !other.has_lock && !other.precedes(&own));

        if !can_have_lock {
            self.tables
                .delete(table, &own.object_type_name, &own.batch_id)
                .await?;
            self.record_denied(&own.identity());

            return Ok(LockResult::DENIED);
        }

        own.has_lock = true;
        self.tables
            .upsert_object(table, &own.object_type_name, &own.batch_id, &own)
            .await?;

        debug!(
            object_type = %own.object_type_name,
            batch_id = %own.batch_id,
            "type lock granted"
        );

        Ok(LockResult::CREATED)
    }

    /// Releases the type lock of `batch`, if it holds one.
    ///
    /// With `mark_canceled`, the batch is also recorded as canceled and, when it held a lock,
    /// an abort message is enqueued for it.
    pub async fn release(&self, batch: &BatchIdentity, mark_canceled: bool) -> IngestResult<()> {
        debug!(
            object_type = %batch.object_type_name,
            batch_id = %batch.batch_id,
            mark_canceled,
            "releasing type lock"
        );

        if mark_canceled {
            let record = CanceledBatchRecord::new(batch, Utc::now());
            self.tables
                .upsert_object(
                    &self.config.tables.canceled_batches,
                    &batch.object_type_name,
                    &batch.batch_id,
                    &record,
                )
                .await?;

            counter!(
                INGEST_BATCHES_CANCELED_TOTAL,
                OBJECT_TYPE_LABEL => batch.object_type_name.clone()
            )
            .increment(1);
        }

        let existed = self
            .tables
            .delete(
                &self.config.tables.lock_candidates,
                &batch.object_type_name,
                &batch.batch_id,
            )
            .await?;

        if mark_canceled && existed {
            info!(
                target: MONITOR_TARGET,
                object_type = %batch.object_type_name,
                batch_id = %batch.batch_id,
                "batch canceled, sending it to abort"
            );
            self.queue
                .enqueue_json(&self.config.queues.abort, &SegmentMessage::forwarded(batch))
                .await?;
        }

        Ok(())
    }

    /// Fails with [`ErrorKind::LockLost`] when the lock candidate of `batch` is gone.
    pub async fn assert_still_held(&self, batch: &BatchIdentity) -> IngestResult<()> {
        let held = self
            .tables
            .exists(
                &self.config.tables.lock_candidates,
                &batch.object_type_name,
                &batch.batch_id,
            )
            .await?;

        if !held {
            bail!(
                ErrorKind::LockLost,
                "Type lock was lost",
                format!("Lock for {batch} disappeared while the batch was running")
            );
        }

        Ok(())
    }

    /// Reschedules a message that lost lock contention, or drops it once it outlived the message
    /// TTL.
    pub async fn handle_denied(
        &self,
        message: &SegmentMessage,
        resend_queue: &str,
    ) -> IngestResult<DeniedOutcome> {
        let now = Utc::now();
        let age = message.age(now);
        let ttl = TimeDelta::from_std(self.config.batch.message_ttl()).unwrap_or(TimeDelta::MAX);

        if age >= ttl {
            error!(
                target: MONITOR_TARGET,
                object_type = %message.object_type_name,
                batch_id = %message.batch_id,
                segment = message.segment,
                age_secs = age.num_seconds(),
                "message timed out waiting for the type lock and is dropped"
            );

            return Ok(DeniedOutcome::Expired);
        }

        let at = next_delivery_time(now, message.segment);
        warn!(
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            segment = message.segment,
            retry_at = %at,
            "another batch holds the type lock, rescheduling message"
        );

        let resent = QueueMessage::json(message)?.scheduled_at(at);
        self.queue.enqueue(resend_queue, resent).await?;

        Ok(DeniedOutcome::Rescheduled { at })
    }

    pub async fn is_canceled(&self, batch: &BatchIdentity) -> IngestResult<bool> {
        self.tables
            .exists(
                &self.config.tables.canceled_batches,
                &batch.object_type_name,
                &batch.batch_id,
            )
            .await
    }

    async fn candidates(&self, object_type_name: &str) -> IngestResult<Vec<LockCandidate>> {
        let candidates = self
            .tables
            .list_objects::<LockCandidate>(&self.config.tables.lock_candidates, object_type_name)
            .await?;

        Ok(candidates
            .into_iter()
            .map(|(_, candidate)| candidate)
            .collect())
    }

    fn record_denied(&self, batch: &BatchIdentity) {
        counter!(
            INGEST_LOCK_DENIED_TOTAL,
            OBJECT_TYPE_LABEL => batch.object_type_name.clone()
        )
        .increment(1);
    }
}
