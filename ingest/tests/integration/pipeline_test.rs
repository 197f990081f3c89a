use futures::future::join_all;
use ingest::dispatch::DispatchOutcome;
use ingest::error::ErrorKind;
use ingest::pipeline::MessageOutcome;
use ingest::store::table::TableStore;
use ingest::types::{
    ABORTED_HASH_MARK, BatchIdentity, ChangeType, DataChangeMessage, DataObjectIdentifier,
    PayloadLocation, SegmentMessage,
};

use crate::common::{
    OBJECT_TYPE, TestEnvironment, deliveries_on, document, random_batch_id, record, test_config,
};

fn processed() -> DispatchOutcome {
    DispatchOutcome::Stage(MessageOutcome::Processed)
}

#[tokio::test]
async fn full_batch_upserts_purges_and_broadcasts() {
    let env = TestEnvironment::new();
    env.seed_documents(vec![
        document("1", "h1", "b0"),
        document("2", "h2", "b0"),
        document("3", "h3", "b0"),
        document("4", "h4", "b0"),
    ])
    .await;

    env.submit_full_batch(
        "b1",
        vec![
            vec![record("1", "h1"), record("2", "h2-new")],
            vec![record("3", "h3"), record("5", "h5")],
        ],
    )
    .await;
    let deliveries = env.run_until_idle().await;

    let stages: Vec<&str> = deliveries
        .iter()
        .map(|delivery| delivery.queue_name.as_str())
        .collect();
    assert_eq!(
        stages,
        vec![
            "receive-fullbatch",
            "receive-fullbatch",
            "purge-plan",
            "purge-execute",
            "broadcast",
            "cleanup",
        ]
    );
    for delivery in &deliveries {
        assert_eq!(delivery.result.as_ref().unwrap(), &processed());
    }

    assert_eq!(env.stored_ids().await, vec!["1", "2", "3", "5"]);

    let notifications: Vec<DataChangeMessage> = env
        .queue
        .messages("data-changes")
        .await
        .iter()
        .map(|message| message.decode().unwrap())
        .collect();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].change_type, ChangeType::AddOrUpdate);
    assert_eq!(
        notifications[0].identifiers,
        vec![
            DataObjectIdentifier::new("2", "p"),
            DataObjectIdentifier::new("5", "p")
        ]
    );
    assert_eq!(notifications[1].change_type, ChangeType::Delete);
    assert_eq!(
        notifications[1].identifiers,
        vec![DataObjectIdentifier::new("4", "p")]
    );

    // Working rows are gone and the lock is free.
    assert_eq!(env.tables.row_count("UnchangedIds").await, 0);
    assert_eq!(env.tables.row_count("DeletedIds").await, 0);
    assert_eq!(env.tables.row_count("ActiveBatches").await, 0);
    assert_eq!(env.tables.row_count("BatchesHandled").await, 2);
}

#[tokio::test]
async fn purge_above_the_sanity_limit_cancels_and_aborts_the_batch() {
    let mut config = test_config();
    config.purge.max_delete_percent = 30;
    let env = TestEnvironment::with_config(config);

    env.seed_documents(
        (0..100)
            .map(|id| document(&id.to_string(), "h", "b0"))
            .collect(),
    )
    .await;

    // 60 rewritten and 5 unchanged: 40 not upserted, 35 of 100 would be deleted.
    let records = (0..65)
        .map(|id| record(&id.to_string(), if id < 60 { "h2" } else { "h" }))
        .collect();
    env.submit_full_batch("b1", vec![records]).await;
    let deliveries = env.run_until_idle().await;

    let plans = deliveries_on(&deliveries, "purge-plan");
    assert_eq!(plans.len(), 1);
    assert_eq!(
        plans[0].result.as_ref().unwrap(),
        &DispatchOutcome::Stage(MessageOutcome::Terminated {
            kind: ErrorKind::DeleteSanityCheckFailed
        })
    );
    assert!(deliveries_on(&deliveries, "purge-execute").is_empty());
    assert!(deliveries_on(&deliveries, "broadcast").is_empty());
    assert_eq!(deliveries_on(&deliveries, "abort").len(), 1);
    assert_eq!(deliveries_on(&deliveries, "cleanup").len(), 1);

    let batch = BatchIdentity::new(OBJECT_TYPE, "b1");
    assert!(
        env.dispatcher
            .pipeline()
            .locks()
            .is_canceled(&batch)
            .await
            .unwrap()
    );

    let documents = env.documents.documents(OBJECT_TYPE).await;
    assert_eq!(documents.len(), 100);
    for document in documents.iter().filter(|document| document.batch_id == "b1") {
        assert!(document.hash.ends_with(ABORTED_HASH_MARK));
    }
    assert!(env.queue.messages("data-changes").await.is_empty());
}

#[tokio::test]
async fn out_of_range_segment_is_dropped_without_locking() {
    let env = TestEnvironment::new();
    let batch = BatchIdentity::new(OBJECT_TYPE, random_batch_id());
    let message = SegmentMessage::new(&batch, 3, 2);

    let outcome = env.dispatch("receive-fullbatch", &message).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Stage(MessageOutcome::OutOfRange));
    assert_eq!(env.tables.row_count("ActiveBatches").await, 0);
    assert_eq!(env.tables.row_count("ImportLogs").await, 0);
}

#[tokio::test]
async fn redelivered_segment_is_skipped_and_keeps_the_lock() {
    let env = TestEnvironment::new();
    let batch_id = random_batch_id();
    let messages = env
        .full_batch_messages(
            &batch_id,
            vec![vec![record("1", "h1")], vec![record("2", "h2")]],
        )
        .await;

    let first = env.dispatch("receive-fullbatch", &messages[0]).await;
    let redelivered = env.dispatch("receive-fullbatch", &messages[0]).await;

    assert_eq!(first.unwrap(), processed());
    assert_eq!(
        redelivered.unwrap(),
        DispatchOutcome::Stage(MessageOutcome::Duplicate)
    );
    env.dispatcher
        .pipeline()
        .locks()
        .assert_still_held(&BatchIdentity::new(OBJECT_TYPE, &batch_id))
        .await
        .unwrap();
    // Only the second segment can complete the stage.
    assert_eq!(env.queue.len("purge-plan").await, 0);

    let second = env.dispatch("receive-fullbatch", &messages[1]).await;
    assert_eq!(second.unwrap(), processed());
    assert_eq!(env.queue.len("purge-plan").await, 1);
}

#[tokio::test]
async fn failed_segment_frees_the_lock_and_runs_again_on_redelivery() {
    let env = TestEnvironment::new();
    let batch = BatchIdentity::new(OBJECT_TYPE, random_batch_id());
    let location = PayloadLocation::new("batches", "late.json");
    let message = SegmentMessage::new(&batch, 1, 1).with_payload(location.clone());

    let err = env
        .dispatch("receive-fullbatch", &message)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PayloadUnavailable);
    assert_eq!(env.tables.row_count("ActiveBatches").await, 0);
    assert!(
        !env.tables
            .exists("ImportLogs", &batch.batch_key(), "receive-fullbatch:1")
            .await
            .unwrap()
    );

    env.payloads
        .insert(location, vec![record("1", "h1")])
        .await;
    let outcome = env.dispatch("receive-fullbatch", &message).await.unwrap();

    assert_eq!(outcome, processed());
    assert_eq!(env.stored_ids().await, vec!["1"]);
    assert_eq!(env.queue.len("purge-plan").await, 1);
}

#[tokio::test]
async fn concurrent_segments_continue_the_stage_once() {
    let env = TestEnvironment::new();
    let messages = env
        .full_batch_messages(
            &random_batch_id(),
            vec![
                vec![record("1", "h1")],
                vec![record("2", "h2")],
                vec![record("3", "h3")],
            ],
        )
        .await;

    let outcomes = join_all(
        messages
            .iter()
            .map(|message| env.dispatch("receive-fullbatch", message)),
    )
    .await;

    for outcome in outcomes {
        assert_eq!(outcome.unwrap(), processed());
    }
    assert_eq!(env.queue.len("purge-plan").await, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_deliveries_of_the_final_segment_continue_the_stage_once() {
    let mut config = test_config();
    config.batch.lock_settle_ms = 50;
    let env = TestEnvironment::with_config(config);
    let batch_id = random_batch_id();
    let messages = env
        .full_batch_messages(
            &batch_id,
            vec![
                vec![record("1", "h1")],
                vec![record("2", "h2")],
                vec![record("3", "h3")],
            ],
        )
        .await;

    for message in &messages[..2] {
        assert_eq!(
            env.dispatch("receive-fullbatch", message).await.unwrap(),
            processed()
        );
    }

    let outcomes = join_all((0..4).map(|_| env.dispatch("receive-fullbatch", &messages[2]))).await;

    let outcomes: Vec<DispatchOutcome> = outcomes.into_iter().map(Result::unwrap).collect();
    let executed = outcomes
        .iter()
        .filter(|outcome| **outcome == processed())
        .count();
    assert_eq!(executed, 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| **outcome == DispatchOutcome::Stage(MessageOutcome::Duplicate))
            .count(),
        3
    );
    assert_eq!(env.queue.len("purge-plan").await, 1);
    assert_eq!(env.stored_ids().await, vec!["1", "2", "3"]);
    env.dispatcher
        .pipeline()
        .locks()
        .assert_still_held(&BatchIdentity::new(OBJECT_TYPE, &batch_id))
        .await
        .unwrap();
}

#[tokio::test]
async fn stage_messages_are_handled_on_spawned_tasks() {
    let env = TestEnvironment::new();
    let messages = env
        .full_batch_messages(&random_batch_id(), vec![vec![record("1", "h1")]])
        .await;

    let dispatcher = env.dispatcher.clone();
    let body = serde_json::to_string(&messages[0]).unwrap();
    let outcome = tokio::spawn(async move { dispatcher.dispatch("receive-fullbatch", &body).await })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome, processed());
    assert_eq!(env.stored_ids().await, vec!["1"]);
    assert_eq!(env.queue.len("purge-plan").await, 1);
}

#[tokio::test]
async fn unknown_queue_is_rejected() {
    let env = TestEnvironment::new();

    let err = env
        .dispatcher
        .dispatch("somewhere-else", "{}")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidMessage);
}

#[tokio::test]
async fn undecodable_stage_message_is_an_error() {
    let env = TestEnvironment::new();

    let err = env
        .dispatcher
        .dispatch("purge-plan", "not json")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DeserializationError);
    assert_eq!(env.tables.row_count("ActiveBatches").await, 0);
}
