#![allow(dead_code)]

use chrono::Utc;
use ingest::dispatch::{DispatchOutcome, Dispatcher};
use ingest::error::IngestResult;
use ingest::store::document::DocumentStore;
use ingest::store::document::memory::MemoryDocumentStore;
use ingest::store::payload::memory::MemoryPayloadSource;
use ingest::store::queue::memory::MemoryQueue;
use ingest::store::queue::MessageQueue;
use ingest::store::table::memory::MemoryTableStore;
use ingest::types::{
    BatchIdentity, Document, DocumentStatus, IncomingRecord, PayloadLocation, SegmentMessage,
};
use ingest_config::shared::IngestConfig;
use ingest_telemetry::tracing::init_test_tracing;
use rand::random;
use serde_json::Map;

pub const OBJECT_TYPE: &str = "customer";

/// Upper bound of messages handled by [`TestEnvironment::run_until_idle`].
const MAX_DELIVERIES: usize = 1_000;

pub type TestDispatcher =
    Dispatcher<MemoryTableStore, MemoryQueue, MemoryDocumentStore, MemoryPayloadSource>;

/// Outcome of one delivery made by [`TestEnvironment::run_until_idle`].
#[derive(Debug)]
pub struct Delivery {
    pub queue_name: String,
    pub message: Option<SegmentMessage>,
    pub result: IngestResult<DispatchOutcome>,
}

/// In-memory deployment of the ingestion core.
pub struct TestEnvironment {
    pub dispatcher: TestDispatcher,
    pub tables: MemoryTableStore,
    pub queue: MemoryQueue,
    pub documents: MemoryDocumentStore,
    pub payloads: MemoryPayloadSource,
}

/// Configuration used by tests: no lock settle delay and small chunks.
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig::default();
    config.batch.lock_settle_ms = 0;
    config.batch.max_tasks_per_message = 2;
    config.batch.max_in_memory_objects = 4;
    config.batch.max_parallel_tasks = 4;
    config.batch.max_parallel_resource_intensive_tasks = 2;

    config
}

pub fn random_batch_id() -> String {
    format!("batch-{}", random::<u32>())
}

pub fn record(id: &str, hash: &str) -> IncomingRecord {
    IncomingRecord::new(id, "p", hash, Map::new())
}

pub fn document(id: &str, hash: &str, batch_id: &str) -> Document {
    Document {
        id: id.to_string(),
        partition_key: "p".to_string(),
        status: DocumentStatus::Active,
        batch_id: batch_id.to_string(),
        hash: hash.to_string(),
        last_update: Utc::now(),
        body: Map::new(),
    }
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: IngestConfig) -> Self {
        init_test_tracing();

        let tables = MemoryTableStore::new();
        let queue = MemoryQueue::new();
        let documents = MemoryDocumentStore::new();
        let payloads = MemoryPayloadSource::new();
        let dispatcher = Dispatcher::new(
            tables.clone(),
            queue.clone(),
            documents.clone(),
            payloads.clone(),
            config,
        )
        .unwrap();

        Self {
            dispatcher,
            tables,
            queue,
            documents,
            payloads,
        }
    }

    pub async fn seed_documents(&self, documents: Vec<Document>) {
        for document in documents {
            self.documents.upsert(OBJECT_TYPE, document).await.unwrap();
        }
    }

    /// Stores the payload of every segment and returns the receive messages, without enqueuing
    /// them.
    pub async fn full_batch_messages(
        &self,
        batch_id: &str,
        segments: Vec<Vec<IncomingRecord>>,
    ) -> Vec<SegmentMessage> {
        let batch = BatchIdentity::new(OBJECT_TYPE, batch_id);
        let segments_total = segments.len() as u32;

        let mut messages = Vec::with_capacity(segments.len());
        for (index, records) in segments.into_iter().enumerate() {
            let segment = index as u32 + 1;
            let location = PayloadLocation::new("batches", format!("{batch_id}/{segment}.json"));
            self.payloads.insert(location.clone(), records).await;

            messages
                .push(SegmentMessage::new(&batch, segment, segments_total).with_payload(location));
        }

        messages
    }

    /// Stores the payloads of a full batch and enqueues its receive messages.
    pub async fn submit_full_batch(&self, batch_id: &str, segments: Vec<Vec<IncomingRecord>>) {
        let receive_queue = self.config().queues.receive_full_batch.clone();

        for message in self.full_batch_messages(batch_id, segments).await {
            self.queue
                .enqueue_json(&receive_queue, &message)
                .await
                .unwrap();
        }
    }

    pub async fn dispatch(
        &self,
        queue_name: &str,
        message: &SegmentMessage,
    ) -> IngestResult<DispatchOutcome> {
        let body = serde_json::to_string(message).unwrap();
        self.dispatcher.dispatch(queue_name, &body).await
    }

    /// Delivers pending messages, oldest first, until every consumed queue is empty.
    ///
    /// Failed messages are not redelivered.
    pub async fn run_until_idle(&self) -> Vec<Delivery> {
        let queue_names = self.dispatcher.queue_names();
        let mut deliveries = Vec::new();

        while let Some((queue_name, message)) = self.queue.pop_oldest(&queue_names).await {
            assert!(
                deliveries.len() < MAX_DELIVERIES,
                "messages kept flowing after {MAX_DELIVERIES} deliveries"
            );

            let result = self.dispatcher.dispatch(&queue_name, &message.body).await;
            deliveries.push(Delivery {
                message: message.decode().ok(),
                queue_name,
                result,
            });
        }

        deliveries
    }

    pub fn config(&self) -> &IngestConfig {
        self.dispatcher.config()
    }

    pub async fn stored_ids(&self) -> Vec<String> {
        self.documents
            .documents(OBJECT_TYPE)
            .await
            .into_iter()
            .map(|document| document.id)
            .collect()
    }
}

/// Returns the deliveries made on `queue_name`.
pub fn deliveries_on<'a>(deliveries: &'a [Delivery], queue_name: &str) -> Vec<&'a Delivery> {
    deliveries
        .iter()
        .filter(|delivery| delivery.queue_name == queue_name)
        .collect()
}
