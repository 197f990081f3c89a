use ingest::dispatch::DispatchOutcome;
use ingest::error::ErrorKind;
use ingest::failpoints::{COORDINATOR_BEFORE_SEGMENT_COMPLETED, PIPELINE_BEFORE_FORWARD};
use ingest::pipeline::MessageOutcome;
use ingest::store::table::TableStore;
use ingest::types::BatchIdentity;

use crate::common::{OBJECT_TYPE, TestEnvironment, record, test_config};
use crate::scenario::IngestFailScenario;

#[tokio::test]
async fn segment_failing_before_completion_runs_again_on_redelivery() {
    let env = TestEnvironment::new();
    let messages = env
        .full_batch_messages("b1", vec![vec![record("1", "h1")]])
        .await;

    let scenario =
        IngestFailScenario::setup(&[(COORDINATOR_BEFORE_SEGMENT_COMPLETED, "return(retry)")]);
    let err = env
        .dispatch("receive-fullbatch", &messages[0])
        .await
        .unwrap_err();
    scenario.teardown();

    assert_eq!(err.kind(), ErrorKind::WithRetry);
    assert!(
        !env.tables
            .exists("ImportLogs", "customer_b1", "receive-fullbatch:1")
            .await
            .unwrap()
    );
    assert_eq!(env.tables.row_count("ActiveBatches").await, 0);

    // The work ran once already, running it again must converge to the same state.
    let outcome = env
        .dispatch("receive-fullbatch", &messages[0])
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Stage(MessageOutcome::Processed));
    assert_eq!(env.stored_ids().await, vec!["1"]);
    assert_eq!(env.queue.len("purge-plan").await, 1);
}

#[tokio::test]
async fn retryable_failure_cancels_the_batch_when_configured() {
    let mut config = test_config();
    config.batch.cancel_on_exception = true;
    let env = TestEnvironment::with_config(config);
    let messages = env
        .full_batch_messages("b1", vec![vec![record("1", "h1")]])
        .await;

    let scenario =
        IngestFailScenario::setup(&[(COORDINATOR_BEFORE_SEGMENT_COMPLETED, "return(retry)")]);
    let err = env
        .dispatch("receive-fullbatch", &messages[0])
        .await
        .unwrap_err();
    scenario.teardown();

    assert_eq!(err.kind(), ErrorKind::WithRetry);
    assert!(
        env.dispatcher
            .pipeline()
            .locks()
            .is_canceled(&BatchIdentity::new(OBJECT_TYPE, "b1"))
            .await
            .unwrap()
    );
    assert_eq!(env.queue.len("abort").await, 1);

    let outcome = env
        .dispatch("receive-fullbatch", &messages[0])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Stage(MessageOutcome::Terminated {
            kind: ErrorKind::BatchCanceled
        })
    );
}

#[tokio::test]
async fn terminal_failure_in_a_continuation_keeps_the_lock() {
    let env = TestEnvironment::new();
    let messages = env
        .full_batch_messages("b1", vec![vec![record("1", "h1")]])
        .await;

    let scenario = IngestFailScenario::setup(&[(PIPELINE_BEFORE_FORWARD, "return")]);
    let outcome = env
        .dispatch("receive-fullbatch", &messages[0])
        .await
        .unwrap();
    scenario.teardown();

    assert_eq!(
        outcome,
        DispatchOutcome::Stage(MessageOutcome::Terminated {
            kind: ErrorKind::WithNoRetry
        })
    );
    assert_eq!(env.queue.len("purge-plan").await, 0);
    env.dispatcher
        .pipeline()
        .locks()
        .assert_still_held(&BatchIdentity::new(OBJECT_TYPE, "b1"))
        .await
        .unwrap();
}
