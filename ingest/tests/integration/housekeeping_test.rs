use std::time::Duration;

use chrono::{TimeDelta, Utc};
use ingest::error::ErrorKind;
use ingest::housekeeping::SweepReport;
use ingest::store::document::DocumentStore;
use ingest::store::payload::PayloadSource;
use ingest::store::table::TableStore;
use ingest::types::DocumentStatus;

use crate::common::{OBJECT_TYPE, TestEnvironment, record, test_config};

#[tokio::test]
async fn sweep_purges_soft_deleted_documents_after_retention() {
    let mut config = test_config();
    config.documents.soft_delete = true;
    let env = TestEnvironment::with_config(config);

    env.submit_full_batch("b1", vec![vec![record("1", "h1"), record("2", "h2")]])
        .await;
    env.run_until_idle().await;
    env.submit_full_batch("b2", vec![vec![record("1", "h1")]])
        .await;
    env.run_until_idle().await;

    let mut documents = env.documents.documents(OBJECT_TYPE).await;
    assert_eq!(documents[1].status, DocumentStatus::SoftDeleted);
    assert_eq!(documents[1].batch_id, "b2");

    // Nothing expired yet.
    let report = env.dispatcher.housekeeper().sweep().await.unwrap();
    assert_eq!(report, SweepReport::default());

    let mut expired = documents.remove(1);
    expired.last_update = Utc::now() - TimeDelta::days(15);
    env.documents.upsert(OBJECT_TYPE, expired).await.unwrap();

    // Temporary rows a crashed batch left behind.
    env.tables
        .upsert(
            "DeletedIds",
            "customer_b3",
            "9|p",
            serde_json::json!({"id": "9", "partition_key": "p"}),
        )
        .await
        .unwrap();
    env.tables
        .backdate_rows("DeletedIds", Duration::from_secs(2 * 24 * 60 * 60))
        .await
        .unwrap();

    let report = env.dispatcher.housekeeper().sweep().await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            temporary_rows_removed: 1,
            payloads_removed: 0,
            history_rows_removed: 0,
            soft_deleted_documents_purged: 1,
        }
    );
    assert_eq!(env.stored_ids().await, vec!["1"]);
}

#[tokio::test]
async fn sweep_deletes_payloads_of_batches_handled_before_the_history_retention() {
    let env = TestEnvironment::new();
    let messages = env
        .full_batch_messages("b1", vec![vec![record("1", "h1")], vec![record("2", "h2")]])
        .await;
    for message in &messages {
        env.dispatch("receive-fullbatch", message).await.unwrap();
    }
    env.run_until_idle().await;

    let report = env.dispatcher.housekeeper().sweep().await.unwrap();
    assert_eq!(report, SweepReport::default());

    env.tables
        .backdate_rows("BatchesHandled", Duration::from_secs(15 * 24 * 60 * 60))
        .await
        .unwrap();
    let report = env.dispatcher.housekeeper().sweep().await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            temporary_rows_removed: 0,
            payloads_removed: 2,
            history_rows_removed: 2,
            soft_deleted_documents_purged: 0,
        }
    );
    for message in &messages {
        let location = message.payload.as_ref().unwrap();
        let err = env.payloads.load(location).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadUnavailable);
    }
    // Documents outlive their payloads.
    assert_eq!(env.stored_ids().await, vec!["1", "2"]);
}
