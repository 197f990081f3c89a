//! Once-per-segment execution of stage work.
//!
//! Every stage of a batch runs its primary work once per segment, however often the segment's
//! message is delivered, and runs its continuation once after all segments completed. Progress is
//! recorded in the execution log table under the batch key:
//!
//! - `"{stage}"` holds the [`StageCompletionRecord`] of the stage.
//! - `"{stage}:{segment}"` holds the segment message together with the claim of the delivery
//!   executing it, written before the primary work and overwritten as completed after it.
//!
//! Concurrent deliveries of the same segment are told apart by a random delivery token. A delivery
//! writes its token, waits for the settle interval and reads the record back. Only the delivery
//! whose token survived goes on, for the segment work and for the stage continuation alike.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::concurrency::bounded::map_bounded;
use crate::concurrency::settle::{delivery_token, settle};
use crate::error::IngestResult;
#[cfg(feature = "failpoints")]
use crate::failpoints::{COORDINATOR_BEFORE_SEGMENT_COMPLETED, ingest_fail_point};
use crate::metrics::{INGEST_STAGE_COMPLETIONS_TOTAL, OBJECT_TYPE_LABEL, STAGE_LABEL};
use crate::store::table::TableStore;
use crate::types::SegmentMessage;

/// Work executed by [`SegmentCoordinator::run_once_per_segment`].
pub trait SegmentWork: Sync {
    /// Primary work of one segment.
    fn run(&self, message: &SegmentMessage) -> impl Future<Output = IngestResult<()>> + Send;

    /// Continuation run once after every segment of the stage completed.
    fn on_all_segments_done(
        &self,
        _message: &SegmentMessage,
    ) -> impl Future<Output = IngestResult<()>> + Send {
        async { Ok(()) }
    }
}

/// What [`SegmentCoordinator::run_once_per_segment`] did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRun {
    /// The primary work ran for this delivery.
    Executed,
    /// The message, the segment or the whole stage was already completed.
    AlreadyCompleted,
    /// Another delivery of the same segment claimed it.
    ClaimedElsewhere,
}

impl SegmentRun {
    pub fn executed(self) -> bool {
        self == SegmentRun::Executed
    }
}

/// Completion state of one stage of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCompletionRecord {
    pub object_type_name: String,
    pub batch_id: String,
    pub stage: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Token of the delivery running the continuation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,
}

impl StageCompletionRecord {
    fn started(message: &SegmentMessage, stage: &str) -> Self {
        Self {
            object_type_name: message.object_type_name.clone(),
            batch_id: message.batch_id.clone(),
            stage: stage.to_string(),
            completed: false,
            completed_at: None,
            claim: None,
        }
    }
}

/// Row stored under `"{stage}:{segment}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentExecution {
    #[serde(flatten)]
    message: SegmentMessage,
    claim: String,
}

/// Deduplicates stage work across redeliveries using the execution log table.
#[derive(Debug, Clone)]
pub struct SegmentCoordinator<T> {
    tables: T,
    table_name: String,
    max_parallel_tasks: usize,
    settle_interval: Duration,
}

impl<T> SegmentCoordinator<T>
where
    T: TableStore,
{
    pub fn new(
        tables: T,
        table_name: impl Into<String>,
        max_parallel_tasks: usize,
        settle_interval: Duration,
    ) -> Self {
        Self {
            tables,
            table_name: table_name.into(),
            max_parallel_tasks,
            settle_interval,
        }
    }

    /// Runs `work` for the segment of `message` unless it already ran, and its continuation when
    /// this segment completes the stage.
    pub async fn run_once_per_segment<W>(
        &self,
        message: &SegmentMessage,
        stage: &str,
        work: &W,
    ) -> IngestResult<SegmentRun>
    where
        W: SegmentWork,
    {
        if message.completed {
            return Ok(SegmentRun::AlreadyCompleted);
        }

        let batch_key = message.batch_key();

        match self
            .tables
            .get_object::<StageCompletionRecord>(&self.table_name, &batch_key, stage)
            .await?
        {
            Some(record) if record.completed => {
                error!(
                    object_type = %message.object_type_name,
                    batch_id = %message.batch_id,
                    stage,
                    "stage already completed for this batch, duplicate message ignored"
                );
                return Ok(SegmentRun::AlreadyCompleted);
            }
            Some(_) => {}
            None => {
                let record = StageCompletionRecord::started(message, stage);
                self.tables
                    .upsert_object(&self.table_name, &batch_key, stage, &record)
                    .await?;
            }
        }

        let token = delivery_token();
        let segment_key = segment_row_key(stage, message.segment);
        match self
            .run_segment(message, stage, &segment_key, &token, work)
            .await
        {
            Ok(run) => Ok(run),
            Err(err) => {
                if let Err(release_err) = self
                    .release_segment(&batch_key, &segment_key, &token)
                    .await
                {
                    error!(
                        batch_key = %batch_key,
                        segment_key = %segment_key,
                        error = %release_err,
                        "failed to remove the started execution record"
                    );
                }

                Err(err)
            }
        }
    }

    async fn run_segment<W>(
        &self,
        message: &SegmentMessage,
        stage: &str,
        segment_key: &str,
        token: &str,
        work: &W,
    ) -> IngestResult<SegmentRun>
    where
        W: SegmentWork,
    {
        let batch_key = message.batch_key();

        debug!(
            batch_key = %batch_key,
            segment_key,
            "checking existing execution of segment"
        );

        let existing = self.segment_execution(&batch_key, segment_key).await?;
        if existing.is_some_and(|existing| existing.message.completed) {
            error!(
                batch_key = %batch_key,
                segment_key,
                "segment already executed, duplicate message skipped"
            );
            return Ok(SegmentRun::AlreadyCompleted);
        }

        let started = SegmentExecution {
            message: message.clone(),
            claim: token.to_string(),
        };
        self.tables
            .upsert_object(&self.table_name, &batch_key, segment_key, &started)
            .await?;

        settle(self.settle_interval).await;

        match self.segment_execution(&batch_key, segment_key).await? {
            Some(current) if current.message.completed => {
                warn!(
                    batch_key = %batch_key,
                    segment_key,
                    "segment was completed concurrently, skipping"
                );
                return Ok(SegmentRun::AlreadyCompleted);
            }
            Some(current) if current.claim == token => {}
            _ => {
                warn!(
                    batch_key = %batch_key,
                    segment_key,
                    "segment claimed by a concurrent delivery, skipping"
                );
                return Ok(SegmentRun::ClaimedElsewhere);
            }
        }

        info!(
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            stage,
            segment = message.segment,
            segments_total = message.segments_total,
            "executing segment"
        );

        work.run(message).await?;

        #[cfg(feature = "failpoints")]
        ingest_fail_point(COORDINATOR_BEFORE_SEGMENT_COMPLETED)?;

        // A delivery that took the segment over while the work ran completes it instead.
        let still_claimed = self
            .segment_execution(&batch_key, segment_key)
            .await?
            .is_some_and(|current| current.claim == token && !current.message.completed);
        if !still_claimed {
            warn!(
                batch_key = %batch_key,
                segment_key,
                "segment claim was taken over while executing, leaving completion to its owner"
            );
            return Ok(SegmentRun::Executed);
        }

        let mut completed = started;
        completed.message.completed = true;
        completed.message.completed_at = Some(Utc::now());
        self.tables
            .upsert_object(&self.table_name, &batch_key, segment_key, &completed)
            .await?;

        if self.all_segments_done(&completed.message, stage).await? {
            self.complete_stage(&completed.message, stage, token, work)
                .await?;
        }

        Ok(SegmentRun::Executed)
    }

    async fn segment_execution(
        &self,
        batch_key: &str,
        segment_key: &str,
    ) -> IngestResult<Option<SegmentExecution>> {
        self.tables
            .get_object::<SegmentExecution>(&self.table_name, batch_key, segment_key)
            .await
    }

    /// Removes the execution record of a failed delivery, unless another delivery claimed it.
    async fn release_segment(
        &self,
        batch_key: &str,
        segment_key: &str,
        token: &str,
    ) -> IngestResult<()> {
        let owned = self
            .segment_execution(batch_key, segment_key)
            .await?
            .is_some_and(|current| current.claim == token);
        if owned {
            self.tables
                .delete(&self.table_name, batch_key, segment_key)
                .await?;
        }

        Ok(())
    }

    /// Returns `true` when every segment of the stage completed and `completed` finished last.
    ///
    /// A segment only completes the stage when its completion time equals the latest recorded
    /// one. Segments completing with identical timestamps can both match, the stage claim taken
    /// in [`Self::complete_stage`] picks one of them.
    async fn all_segments_done(
        &self,
        completed: &SegmentMessage,
        stage: &str,
    ) -> IngestResult<bool> {
        if completed.segments_total <= 1 {
            return Ok(true);
        }

        let batch_key = completed.batch_key();
        let prefix = format!("{stage}:");
        let segment_keys: Vec<String> = self
            .tables
            .list_row_keys(&self.table_name, &batch_key)
            .await?
            .into_iter()
            .filter(|row_key| row_key.starts_with(&prefix))
            .collect();

        if segment_keys.len() != completed.segments_total as usize {
            return Ok(false);
        }

        let records = map_bounded(segment_keys, self.max_parallel_tasks, |segment_key| {
            let batch_key = &batch_key;
            async move {
                self.tables
                    .get_object::<SegmentMessage>(&self.table_name, batch_key, &segment_key)
                    .await
            }
        })
        .await?;

        let completion_times: Option<Vec<DateTime<Utc>>> = records
            .into_iter()
            .map(|record| record.filter(|r| r.completed).and_then(|r| r.completed_at))
            .collect();
        let Some(completion_times) = completion_times else {
            return Ok(false);
        };

        let latest = completion_times.into_iter().max();

        Ok(latest.is_some() && latest == completed.completed_at)
    }

    async fn complete_stage<W>(
        &self,
        message: &SegmentMessage,
        stage: &str,
        token: &str,
        work: &W,
    ) -> IngestResult<()>
    where
        W: SegmentWork,
    {
        let batch_key = message.batch_key();

        let mut record = self
            .tables
            .get_object::<StageCompletionRecord>(&self.table_name, &batch_key, stage)
            .await?
            .unwrap_or_else(|| StageCompletionRecord::started(message, stage));
        if record.completed {
            warn!(
                batch_key = %batch_key,
                stage,
                "stage was completed concurrently, skipping continuation"
            );
            return Ok(());
        }

        record.claim = Some(token.to_string());
        self.tables
            .upsert_object(&self.table_name, &batch_key, stage, &record)
            .await?;

        settle(self.settle_interval).await;

        let current = self
            .tables
            .get_object::<StageCompletionRecord>(&self.table_name, &batch_key, stage)
            .await?;
        let claimed = current
            .is_some_and(|current| !current.completed && current.claim.as_deref() == Some(token));
        if !claimed {
            warn!(
                batch_key = %batch_key,
                stage,
                "stage continuation claimed by a concurrent delivery, skipping"
            );
            return Ok(());
        }

        work.on_all_segments_done(message).await?;

        record.completed = true;
        record.completed_at = Some(Utc::now());
        self.tables
            .upsert_object(&self.table_name, &batch_key, stage, &record)
            .await?;

        counter!(
            INGEST_STAGE_COMPLETIONS_TOTAL,
            STAGE_LABEL => stage.to_string(),
            OBJECT_TYPE_LABEL => message.object_type_name.clone()
        )
        .increment(1);

        info!(
            object_type = %message.object_type_name,
            batch_id = %message.batch_id,
            stage,
            "all segments of stage completed"
        );

        Ok(())
    }
}

fn segment_row_key(stage: &str, segment: u32) -> String {
    format!("{stage}:{segment}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;

    use super::*;
    use crate::bail;
    use crate::error::ErrorKind;
    use crate::store::table::memory::MemoryTableStore;
    use crate::types::BatchIdentity;

    const TABLE: &str = "ImportLogs";

    #[derive(Default)]
    struct CountingWork {
        runs: AtomicUsize,
        all_done: AtomicUsize,
        fail: bool,
    }

    impl SegmentWork for CountingWork {
        async fn run(&self, _message: &SegmentMessage) -> IngestResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            // Gives concurrent deliveries the chance to interleave, like real store I/O.
            tokio::task::yield_now().await;
            if self.fail {
                bail!(ErrorKind::DocumentStoreFailed, "Primary work failed");
            }
            Ok(())
        }

        async fn on_all_segments_done(&self, _message: &SegmentMessage) -> IngestResult<()> {
            tokio::task::yield_now().await;
            self.all_done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn coordinator_with_settle(
        settle_interval: Duration,
    ) -> (SegmentCoordinator<MemoryTableStore>, MemoryTableStore) {
        let tables = MemoryTableStore::new();
        (
            SegmentCoordinator::new(tables.clone(), TABLE, 4, settle_interval),
            tables,
        )
    }

    fn coordinator() -> (SegmentCoordinator<MemoryTableStore>, MemoryTableStore) {
        coordinator_with_settle(Duration::ZERO)
    }

    fn message(segment: u32, total: u32) -> SegmentMessage {
        SegmentMessage::new(&BatchIdentity::new("customer", "b1"), segment, total)
    }

    #[tokio::test]
    async fn single_segment_runs_once_and_completes() {
        let (coordinator, _) = coordinator();
        let work = CountingWork::default();

        let first = coordinator
            .run_once_per_segment(&message(1, 1), "broadcast", &work)
            .await
            .unwrap();
        let second = coordinator
            .run_once_per_segment(&message(1, 1), "broadcast", &work)
            .await
            .unwrap();

        assert_eq!(first, SegmentRun::Executed);
        assert_eq!(second, SegmentRun::AlreadyCompleted);
        assert_eq!(work.runs.load(Ordering::SeqCst), 1);
        assert_eq!(work.all_done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_segment_is_skipped() {
        let (coordinator, _) = coordinator();
        let work = CountingWork::default();

        coordinator
            .run_once_per_segment(&message(1, 3), "receive", &work)
            .await
            .unwrap();
        let run = coordinator
            .run_once_per_segment(&message(1, 3), "receive", &work)
            .await
            .unwrap();

        assert_eq!(run, SegmentRun::AlreadyCompleted);
        assert_eq!(work.runs.load(Ordering::SeqCst), 1);
        assert_eq!(work.all_done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn last_segment_triggers_the_continuation() {
        let (coordinator, tables) = coordinator();
        let work = CountingWork::default();

        for segment in [2, 3, 1] {
            coordinator
                .run_once_per_segment(&message(segment, 3), "receive", &work)
                .await
                .unwrap();
        }

        assert_eq!(work.runs.load(Ordering::SeqCst), 3);
        assert_eq!(work.all_done.load(Ordering::SeqCst), 1);

        let record: StageCompletionRecord = tables
            .get_object(TABLE, "customer_b1", "receive")
            .await
            .unwrap()
            .unwrap();
        assert!(record.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_deliveries_of_the_final_segment_continue_once() {
        let (coordinator, _) = coordinator_with_settle(Duration::from_millis(50));
        let work = CountingWork::default();

        for segment in [1, 2] {
            coordinator
                .run_once_per_segment(&message(segment, 3), "receive", &work)
                .await
                .unwrap();
        }

        let final_segment = message(3, 3);
        let runs = join_all(
            (0..3).map(|_| coordinator.run_once_per_segment(&final_segment, "receive", &work)),
        )
        .await;

        let executed = runs
            .into_iter()
            .filter(|run| run.as_ref().unwrap().executed())
            .count();
        assert_eq!(executed, 1);
        assert_eq!(work.runs.load(Ordering::SeqCst), 3);
        assert_eq!(work.all_done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_deliveries_of_a_single_segment_continue_once() {
        let (coordinator, _) = coordinator();
        let work = CountingWork::default();

        let only_segment = message(1, 1);
        let runs = join_all(
            (0..4).map(|_| coordinator.run_once_per_segment(&only_segment, "broadcast", &work)),
        )
        .await;

        let mut runs: Vec<SegmentRun> = runs.into_iter().map(Result::unwrap).collect();
        runs.sort_by_key(|run| run.executed());
        assert_eq!(
            runs,
            vec![
                SegmentRun::ClaimedElsewhere,
                SegmentRun::ClaimedElsewhere,
                SegmentRun::ClaimedElsewhere,
                SegmentRun::Executed,
            ]
        );
        assert_eq!(work.runs.load(Ordering::SeqCst), 1);
        assert_eq!(work.all_done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_message_is_ignored() {
        let (coordinator, _) = coordinator();
        let work = CountingWork::default();

        let mut completed = message(1, 1);
        completed.completed = true;

        let run = coordinator
            .run_once_per_segment(&completed, "receive", &work)
            .await
            .unwrap();

        assert_eq!(run, SegmentRun::AlreadyCompleted);
        assert_eq!(work.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_work_removes_the_started_record() {
        let (coordinator, tables) = coordinator();
        let work = CountingWork {
            fail: true,
            ..Default::default()
        };

        let err = coordinator
            .run_once_per_segment(&message(1, 2), "receive", &work)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DocumentStoreFailed);
        assert!(!tables.exists(TABLE, "customer_b1", "receive:1").await.unwrap());

        let retry = CountingWork::default();
        let run = coordinator
            .run_once_per_segment(&message(1, 2), "receive", &retry)
            .await
            .unwrap();
        assert_eq!(run, SegmentRun::Executed);
    }

    #[tokio::test]
    async fn foreign_claim_is_kept_when_work_fails() {
        let (coordinator, tables) = coordinator();
        let foreign = SegmentExecution {
            message: message(1, 2),
            claim: "other-delivery".to_string(),
        };

        coordinator
            .release_segment("customer_b1", "receive:1", "this-delivery")
            .await
            .unwrap();
        assert!(!tables.exists(TABLE, "customer_b1", "receive:1").await.unwrap());

        tables
            .upsert_object(TABLE, "customer_b1", "receive:1", &foreign)
            .await
            .unwrap();
        coordinator
            .release_segment("customer_b1", "receive:1", "this-delivery")
            .await
            .unwrap();

        let kept = coordinator
            .segment_execution("customer_b1", "receive:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.claim, "other-delivery");
    }

    #[tokio::test]
    async fn only_the_latest_segment_completes_the_stage() {
        let (coordinator, tables) = coordinator();
        let finished_at = Utc::now();

        let mut first = message(1, 2);
        first.completed = true;
        first.completed_at = Some(finished_at - chrono::TimeDelta::seconds(1));
        tables
            .upsert_object(TABLE, "customer_b1", "purge-execute:1", &first)
            .await
            .unwrap();

        let mut second = message(2, 2);
        second.completed = true;
        second.completed_at = Some(finished_at);
        tables
            .upsert_object(TABLE, "customer_b1", "purge-execute:2", &second)
            .await
            .unwrap();

        assert!(
            coordinator
                .all_segments_done(&second, "purge-execute")
                .await
                .unwrap()
        );
        assert!(
            !coordinator
                .all_segments_done(&first, "purge-execute")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn unfinished_segment_blocks_completion() {
        let (coordinator, tables) = coordinator();

        let started = message(1, 2);
        tables
            .upsert_object(TABLE, "customer_b1", "purge-execute:1", &started)
            .await
            .unwrap();

        let mut second = message(2, 2);
        second.completed = true;
        second.completed_at = Some(Utc::now());
        tables
            .upsert_object(TABLE, "customer_b1", "purge-execute:2", &second)
            .await
            .unwrap();

        assert!(
            !coordinator
                .all_segments_done(&second, "purge-execute")
                .await
                .unwrap()
        );
    }
}
