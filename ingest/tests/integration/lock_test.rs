use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use ingest::dispatch::DispatchOutcome;
use ingest::error::ErrorKind;
use ingest::lock::TypeLockManager;
use ingest::lock::schedule::RESCHEDULE_GRID_SECS;
use ingest::pipeline::MessageOutcome;
use ingest::store::queue::memory::MemoryQueue;
use ingest::store::table::memory::MemoryTableStore;
use ingest::types::{BatchIdentity, SegmentMessage};

use crate::common::{OBJECT_TYPE, TestEnvironment, deliveries_on, record, test_config};

#[tokio::test(start_paused = true)]
async fn only_one_of_many_racing_batches_gets_the_lock() {
    let mut config = test_config();
    config.batch.lock_settle_ms = 50;
    let tables = MemoryTableStore::new();
    let locks = TypeLockManager::new(tables.clone(), MemoryQueue::new(), Arc::new(config));

    let now = Utc::now();
    let messages: Vec<SegmentMessage> = (0..5)
        .map(|index| {
            let batch = BatchIdentity::new(OBJECT_TYPE, format!("b{index}"));
            let mut message = SegmentMessage::new(&batch, 1, 1);
            message.created = now + TimeDelta::milliseconds(index);
            message
        })
        .collect();

    let results = join_all(
        messages
            .iter()
            .map(|message| locks.acquire_or_contend(message)),
    )
    .await;

    let granted: Vec<usize> = results
        .into_iter()
        .enumerate()
        .filter_map(|(index, result)| {
            let lock = result.unwrap();
            assert_eq!(lock.granted, lock.newly_created);
            lock.granted.then_some(index)
        })
        .collect();

    assert_eq!(granted, vec![0]);
    assert_eq!(tables.row_count("ActiveBatches").await, 1);
}

#[tokio::test]
async fn batch_waits_for_the_lock_holder_on_the_reschedule_grid() {
    let env = TestEnvironment::new();
    let holder = env
        .full_batch_messages("b1", vec![vec![record("1", "h1")], vec![record("2", "h2")]])
        .await;
    let waiting = env
        .full_batch_messages("b2", vec![vec![record("3", "h3")], vec![record("4", "h4")]])
        .await;

    env.dispatch("receive-fullbatch", &holder[0]).await.unwrap();
    let outcome = env
        .dispatch("receive-fullbatch", &waiting[1])
        .await
        .unwrap();

    let DispatchOutcome::Stage(MessageOutcome::Rescheduled { at }) = outcome else {
        panic!("expected the message to be rescheduled, got {outcome:?}");
    };
    assert_eq!(at.timestamp() % RESCHEDULE_GRID_SECS, 1);

    let resent = env.queue.messages("receive-fullbatch").await;
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].scheduled_enqueue_time, Some(at));
    let resent: SegmentMessage = resent[0].decode().unwrap();
    assert_eq!(resent, waiting[1]);
}

#[tokio::test]
async fn message_waiting_longer_than_its_ttl_expires() {
    let env = TestEnvironment::new();
    let holder = env
        .full_batch_messages("b1", vec![vec![record("1", "h1")], vec![record("2", "h2")]])
        .await;
    let mut waiting = env
        .full_batch_messages("b2", vec![vec![record("3", "h3")]])
        .await;
    waiting[0].created = Utc::now() - TimeDelta::hours(25);

    env.dispatch("receive-fullbatch", &holder[0]).await.unwrap();
    let outcome = env
        .dispatch("receive-fullbatch", &waiting[0])
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Stage(MessageOutcome::Expired));
    assert_eq!(env.queue.len("receive-fullbatch").await, 0);
}

#[tokio::test]
async fn stale_lock_is_reaped_and_its_batch_aborted_once() {
    let env = TestEnvironment::new();
    let mut stale = env
        .full_batch_messages("b1", vec![vec![record("1", "h1")], vec![record("2", "h2")]])
        .await;
    for message in &mut stale {
        message.created = Utc::now() - TimeDelta::hours(3);
    }

    env.dispatch("receive-fullbatch", &stale[0]).await.unwrap();
    env.submit_full_batch("b2", vec![vec![record("3", "h3")]])
        .await;
    let deliveries = env.run_until_idle().await;

    let aborts = deliveries_on(&deliveries, "abort");
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].message.as_ref().unwrap().batch_id, "b1");
    // The second batch ran to completion, the first was aborted and cleaned up.
    assert_eq!(deliveries_on(&deliveries, "cleanup").len(), 2);
    assert_eq!(env.tables.row_count("ActiveBatches").await, 0);

    let canceled = BatchIdentity::new(OBJECT_TYPE, "b1");
    assert!(
        env.dispatcher
            .pipeline()
            .locks()
            .is_canceled(&canceled)
            .await
            .unwrap()
    );

    // The rest of the reaped batch is refused for good.
    let outcome = env
        .dispatch("receive-fullbatch", &stale[1])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Stage(MessageOutcome::Terminated {
            kind: ErrorKind::BatchCanceled
        })
    );
    assert_eq!(env.queue.len("abort").await, 0);
}

#[tokio::test]
async fn segments_of_the_lock_holder_are_regranted() {
    let env = TestEnvironment::new();
    let messages = env
        .full_batch_messages(
            "b1",
            vec![
                vec![record("1", "h1")],
                vec![record("2", "h2")],
                vec![record("3", "h3")],
            ],
        )
        .await;

    for message in &messages {
        let outcome = env.dispatch("receive-fullbatch", message).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Stage(MessageOutcome::Processed));
    }

    assert_eq!(env.tables.row_count("ActiveBatches").await, 1);
    assert_eq!(env.queue.len("purge-plan").await, 1);
}
