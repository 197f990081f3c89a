use std::sync::Arc;

use chrono::Utc;
use ingest_config::shared::IngestConfig;
use metrics::counter;
use tracing::info;

use crate::concurrency::bounded::for_each_bounded;
use crate::error::IngestResult;
use crate::metrics::{CHANGE_TYPE_LABEL, INGEST_CHANGE_NOTIFICATIONS_TOTAL, OBJECT_TYPE_LABEL};
use crate::store::queue::{MessageQueue, QueueMessage};
use crate::types::{BatchIdentity, ChangeType, DataChangeMessage, DataObjectIdentifier};

/// Publishes change notifications on the change topic.
///
/// Identifiers are sent in chunks of at most `max_tasks_per_message`, each message labeled with
/// the object type so subscribers can filter on it.
#[derive(Debug, Clone)]
pub struct ChangeBroadcaster<Q> {
    queue: Q,
    config: Arc<IngestConfig>,
}

impl<Q> ChangeBroadcaster<Q>
where
    Q: MessageQueue,
{
    pub fn new(queue: Q, config: Arc<IngestConfig>) -> Self {
        Self { queue, config }
    }

    /// Broadcasts `identifiers` as changes of `change_type` and returns how many were sent.
    pub async fn broadcast<I>(
        &self,
        batch: &BatchIdentity,
        identifiers: I,
        change_type: ChangeType,
    ) -> IngestResult<usize>
    where
        I: IntoIterator<Item = DataObjectIdentifier>,
    {
        let chunk_size = self.config.batch.max_tasks_per_message.max(1);
        let topic = &self.config.queues.change_topic;

        let mut chunks: Vec<Vec<DataObjectIdentifier>> = Vec::new();
        for identifier in identifiers {
            match chunks.last_mut() {
                Some(chunk) if chunk.len() < chunk_size => chunk.push(identifier),
                _ => chunks.push(vec![identifier]),
            }
        }

        let affected = chunks.iter().map(Vec::len).sum();
        let messages = chunks.len();

        for_each_bounded(
            chunks,
            self.config.batch.max_parallel_tasks,
            |identifiers| async move {
                let count = identifiers.len();
                let change = DataChangeMessage {
                    object_type_name: batch.object_type_name.clone(),
                    batch_id: batch.batch_id.clone(),
                    change_type,
                    identifiers,
                    created: Utc::now(),
                };
                let message = QueueMessage::json(&change)?.with_label(&batch.object_type_name);

                info!(
                    object_type = %batch.object_type_name,
                    batch_id = %batch.batch_id,
                    change_type = change_type.as_str(),
                    count,
                    topic = %topic,
                    "broadcasting change"
                );

                self.queue.enqueue(topic, message).await
            },
        )
        .await?;

        counter!(
            INGEST_CHANGE_NOTIFICATIONS_TOTAL,
            OBJECT_TYPE_LABEL => batch.object_type_name.clone(),
            CHANGE_TYPE_LABEL => change_type.as_str()
        )
        .increment(messages as u64);

        Ok(affected)
    }
}
