use std::sync::Arc;

use chrono::{DateTime, Utc};
use ingest_config::shared::IngestConfig;
use metrics::counter;
use tracing::{error, info, warn};

use crate::bail;
use crate::broadcast::ChangeBroadcaster;
use crate::coordinator::{SegmentCoordinator, SegmentRun, SegmentWork};
use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::ingestor::RecordIngestor;
use crate::lock::{DeniedOutcome, TypeLockManager};
use crate::metrics::{
    ERROR_KIND_LABEL, INGEST_MESSAGE_ERRORS_TOTAL, INGEST_MESSAGES_HANDLED_TOTAL, MONITOR_TARGET,
    OUTCOME_LABEL, STAGE_LABEL,
};
use crate::pipeline::stage::Stage;
use crate::policy::{LockAction, build_error_handling_policy};
use crate::store::document::DocumentStore;
use crate::store::payload::PayloadSource;
use crate::store::queue::MessageQueue;
use crate::store::table::TableStore;
use crate::types::SegmentMessage;

/// How a stage message was handled.
///
/// Failures that should be retried are returned as errors instead, so the transport redelivers
/// the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The segment's work ran.
    Processed,
    /// The segment or stage already ran, or a concurrent delivery of the segment runs it. The
    /// message was dropped.
    Duplicate,
    /// Another batch holds the type lock, the message was enqueued again.
    Rescheduled { at: DateTime<Utc> },
    /// The message waited for the type lock longer than the message TTL and was dropped.
    Expired,
    /// The segment number is outside `1..=segments_total`, the message was dropped.
    OutOfRange,
    /// The batch stopped for good and the message must not be retried.
    Terminated { kind: ErrorKind },
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Processed => "processed",
            MessageOutcome::Duplicate => "duplicate",
            MessageOutcome::Rescheduled { .. } => "rescheduled",
            MessageOutcome::Expired => "expired",
            MessageOutcome::OutOfRange => "out_of_range",
            MessageOutcome::Terminated { .. } => "terminated",
        }
    }
}

/// Drives full batches through the pipeline stages.
///
/// Every stage message goes through the same steps: decode, range check, type lock for stages
/// that need it, then once-per-segment execution through the [`SegmentCoordinator`].
#[derive(Debug, Clone)]
pub struct BatchPipeline<T, Q, D, P> {
    pub(super) tables: T,
    pub(super) queue: Q,
    pub(super) documents: D,
    pub(super) payloads: P,
    pub(super) locks: TypeLockManager<T, Q>,
    pub(super) coordinator: SegmentCoordinator<T>,
    pub(super) ingestor: RecordIngestor<D>,
    pub(super) broadcaster: ChangeBroadcaster<Q>,
    pub(super) config: Arc<IngestConfig>,
}

impl<T, Q, D, P> BatchPipeline<T, Q, D, P>
where
    T: TableStore + Clone,
    Q: MessageQueue + Clone,
    D: DocumentStore + Clone,
    P: PayloadSource,
{
    pub fn new(tables: T, queue: Q, documents: D, payloads: P, config: Arc<IngestConfig>) -> Self {
        let locks = TypeLockManager::new(tables.clone(), queue.clone(), config.clone());
        let coordinator = SegmentCoordinator::new(
            tables.clone(),
            config.tables.execution_log.clone(),
            config.batch.max_parallel_tasks,
            config.batch.lock_settle_interval(),
        );
        let ingestor = RecordIngestor::new(documents.clone(), config.clone());
        let broadcaster = ChangeBroadcaster::new(queue.clone(), config.clone());

        Self {
            tables,
            queue,
            documents,
            payloads,
            locks,
            coordinator,
            ingestor,
            broadcaster,
            config,
        }
    }

    pub fn locks(&self) -> &TypeLockManager<T, Q> {
        &self.locks
    }

    /// Handles one message received on `queue_name`.
    ///
    /// Returns an error when the message should be redelivered.
    pub async fn handle_message(
        &self,
        queue_name: &str,
        body: &str,
    ) -> IngestResult<MessageOutcome> {
        let Some(stage) = Stage::from_queue_name(&self.config.queues, queue_name) else {
            bail!(
                ErrorKind::InvalidMessage,
                "Queue is not a pipeline stage",
                queue_name
            );
        };

        let message: SegmentMessage = match serde_json::from_str(body) {
            Ok(message) => message,
            Err(err) => {
                error!(
                    target: MONITOR_TARGET,
                    stage = stage.as_str(),
                    body,
                    error = %err,
                    "cannot deserialize stage message"
                );
                return Err(err.into());
            }
        };

        let outcome = match self.process(stage, &message).await {
            Ok(outcome) => outcome,
            Err(err) => self.handle_failure(stage, &message, err).await?,
        };

        counter!(
            INGEST_MESSAGES_HANDLED_TOTAL,
            STAGE_LABEL => stage.as_str(),
            OUTCOME_LABEL => outcome.as_str()
        )
        .increment(1);

        Ok(outcome)
    }

    async fn process(&self, stage: Stage, message: &SegmentMessage) -> IngestResult<MessageOutcome> {
        if !message.is_segment_in_range() {
            error!(
                object_type = %message.object_type_name,
                batch_id = %message.batch_id,
                stage = stage.as_str(),
                segment = message.segment,
                segments_total = message.segments_total,
                "segment number is out of range, message dropped"
            );
            return Ok(MessageOutcome::OutOfRange);
        }

        info!(
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            stage = stage.as_str(),
            segment = message.segment,
            segments_total = message.segments_total,
            "start processing stage message"
        );

        let mut newly_locked = false;
        if stage.requires_lock() {
            let lock = self.locks.acquire_or_contend(message).await?;
            if !lock.granted {
                let resend_queue = stage.queue_name(&self.config.queues);
                return match self.locks.handle_denied(message, resend_queue).await? {
                    DeniedOutcome::Rescheduled { at } => Ok(MessageOutcome::Rescheduled { at }),
                    DeniedOutcome::Expired => Ok(MessageOutcome::Expired),
                };
            }
            newly_locked = lock.newly_created;
        }

        let work = StageWork {
            pipeline: self,
            stage,
        };
        let run = self
            .coordinator
            .run_once_per_segment(message, stage.as_str(), &work)
            .await?;

        if !run.executed() {
            error!(
                object_type = %message.object_type_name,
                batch_id = %message.batch_id,
                stage = stage.as_str(),
                segment = message.segment,
                ?run,
                "stage message dropped"
            );
            // A concurrent delivery of the same segment still needs the lock.
            if newly_locked && run == SegmentRun::AlreadyCompleted {
                self.locks.release(&message.identity(), false).await?;
            }

            return Ok(MessageOutcome::Duplicate);
        }

        info!(
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            stage = stage.as_str(),
            segment = message.segment,
            segments_total = message.segments_total,
            "done processing stage message"
        );

        Ok(MessageOutcome::Processed)
    }

    async fn handle_failure(
        &self,
        stage: Stage,
        message: &SegmentMessage,
        err: IngestError,
    ) -> IngestResult<MessageOutcome> {
        let policy = build_error_handling_policy(&err);

        error!(
            target: MONITOR_TARGET,
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            stage = stage.as_str(),
            segment = message.segment,
            error = %err,
            "stage failed"
        );
        counter!(
            INGEST_MESSAGE_ERRORS_TOTAL,
            STAGE_LABEL => stage.as_str(),
            ERROR_KIND_LABEL => format!("{:?}", err.kind())
        )
        .increment(1);

        let mark_canceled = match policy.lock_action() {
            LockAction::Keep => None,
            LockAction::ReleaseAndCancel => Some(true),
            LockAction::ReleaseCancelIfConfigured => Some(self.config.batch.cancel_on_exception),
        };
        if let Some(mark_canceled) = mark_canceled {
            if let Err(release_err) = self.locks.release(&message.identity(), mark_canceled).await {
                error!(
                    object_type = %message.object_type_name,
                    batch_id = %message.batch_id,
                    error = %release_err,
                    "failed to release the type lock after a stage failure"
                );
                return Err(vec![err, release_err].into());
            }
        }

        if policy.is_terminal() {
            warn!(
                object_type = %message.object_type_name,
                batch_id = %message.batch_id,
                stage = stage.as_str(),
                kind = ?err.kind(),
                "batch terminated, message will not be retried"
            );
            return Ok(MessageOutcome::Terminated { kind: err.kind() });
        }

        Err(err)
    }
}

/// Binds a stage to the pipeline for the [`SegmentCoordinator`].
struct StageWork<'a, T, Q, D, P> {
    pipeline: &'a BatchPipeline<T, Q, D, P>,
    stage: Stage,
}

impl<T, Q, D, P> SegmentWork for StageWork<'_, T, Q, D, P>
where
    T: TableStore + Clone,
    Q: MessageQueue + Clone,
    D: DocumentStore + Clone,
    P: PayloadSource,
{
    async fn run(&self, message: &SegmentMessage) -> IngestResult<()> {
        self.pipeline.run_stage(self.stage, message).await
    }

    async fn on_all_segments_done(&self, message: &SegmentMessage) -> IngestResult<()> {
        self.pipeline.continue_stage(self.stage, message).await
    }
}
