use chrono::Utc;
use ingest::dispatch::DispatchOutcome;
use ingest::store::table::TableStore;
use ingest::types::{
    ChangeMessage, ChangeType, DataChangeMessage, DataObjectIdentifier, IncomingRecord,
    PayloadLocation,
};
use serde_json::{Map, json};

use crate::common::{OBJECT_TYPE, TestEnvironment, document, record};

async fn send_change(
    env: &TestEnvironment,
    batch_id: &str,
    change_type: ChangeType,
    records: Vec<IncomingRecord>,
) -> DispatchOutcome {
    let payload = PayloadLocation::new("changes", format!("{batch_id}.json"));
    env.payloads.insert(payload.clone(), records).await;

    let message = ChangeMessage {
        object_type_name: OBJECT_TYPE.to_string(),
        batch_id: batch_id.to_string(),
        change_type,
        payload,
        created: Utc::now(),
    };
    let body = serde_json::to_string(&message).unwrap();

    env.dispatcher.dispatch("receive-change", &body).await.unwrap()
}

async fn notifications(env: &TestEnvironment) -> Vec<DataChangeMessage> {
    env.queue
        .drain("data-changes")
        .await
        .iter()
        .map(|message| message.decode().unwrap())
        .collect()
}

#[tokio::test]
async fn changes_are_applied_without_the_type_lock() {
    let env = TestEnvironment::new();
    env.seed_documents(vec![document("1", "h1", "b0")]).await;

    let outcome = send_change(
        &env,
        "c1",
        ChangeType::AddOrUpdate,
        vec![record("1", "h1"), record("2", "h2")],
    )
    .await;

    assert_eq!(outcome, DispatchOutcome::ChangeApplied);
    assert_eq!(env.stored_ids().await, vec!["1", "2"]);
    assert_eq!(env.tables.row_count("ActiveBatches").await, 0);

    let sent = notifications(&env).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].change_type, ChangeType::AddOrUpdate);
    assert_eq!(sent[0].identifiers, vec![DataObjectIdentifier::new("2", "p")]);
    assert!(
        env.tables
            .exists("ChangesHandled", "customer_c1", "add_or_update")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn patch_merges_fields_and_broadcasts_as_update() {
    let env = TestEnvironment::new();
    let mut stored = document("1", "h1", "b0");
    stored.body = Map::from_iter([
        ("name".to_string(), json!("Ada")),
        ("city".to_string(), json!("London")),
    ]);
    env.seed_documents(vec![stored]).await;

    let mut patch = record("1", "h2");
    patch.body = Map::from_iter([("city".to_string(), json!("Paris"))]);
    send_change(&env, "c1", ChangeType::Patch, vec![patch]).await;

    let documents = env.documents.documents(OBJECT_TYPE).await;
    assert_eq!(documents[0].body["name"], json!("Ada"));
    assert_eq!(documents[0].body["city"], json!("Paris"));

    let sent = notifications(&env).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].change_type, ChangeType::AddOrUpdate);
}

#[tokio::test]
async fn delete_change_removes_documents() {
    let env = TestEnvironment::new();
    env.seed_documents(vec![document("1", "h1", "b0"), document("2", "h2", "b0")])
        .await;

    send_change(&env, "c1", ChangeType::Delete, vec![record("1", "h1")]).await;

    assert_eq!(env.stored_ids().await, vec!["2"]);
    let sent = notifications(&env).await;
    assert_eq!(sent[0].change_type, ChangeType::Delete);
    assert_eq!(sent[0].identifiers, vec![DataObjectIdentifier::new("1", "p")]);
}
