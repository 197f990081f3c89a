use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::IngestResult;
use crate::store::queue::{MessageQueue, QueueMessage};

#[derive(Debug, Clone)]
struct Enqueued {
    sequence: u64,
    message: QueueMessage,
}

#[derive(Debug, Default)]
struct Inner {
    next_sequence: u64,
    queues: HashMap<String, VecDeque<Enqueued>>,
}

/// In-memory [`MessageQueue`] keeping messages in enqueue order.
///
/// Scheduled enqueue times are recorded but not enforced, consumers decide whether to honor
/// them.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending messages of `queue_name` without removing them.
    pub async fn messages(&self, queue_name: &str) -> Vec<QueueMessage> {
        let inner = self.inner.lock().await;

        inner
            .queues
            .get(queue_name)
            .map(|queue| queue.iter().map(|entry| entry.message.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, queue_name: &str) -> usize {
        let inner = self.inner.lock().await;

        inner.queues.get(queue_name).map(VecDeque::len).unwrap_or(0)
    }

    pub async fn pop(&self, queue_name: &str) -> Option<QueueMessage> {
        let mut inner = self.inner.lock().await;

        inner
            .queues
            .get_mut(queue_name)
            .and_then(VecDeque::pop_front)
            .map(|entry| entry.message)
    }

    /// Removes and returns the oldest message across `queue_names`.
    pub async fn pop_oldest(&self, queue_names: &[&str]) -> Option<(String, QueueMessage)> {
        let mut inner = self.inner.lock().await;

        let queue_name = queue_names
            .iter()
            .filter_map(|name| {
                inner
                    .queues
                    .get(*name)
                    .and_then(VecDeque::front)
                    .map(|entry| (entry.sequence, *name))
            })
            .min()
            .map(|(_, name)| name.to_string())?;

        let entry = inner.queues.get_mut(&queue_name)?.pop_front()?;

        Some((queue_name, entry.message))
    }

    /// Removes every pending message of `queue_name`.
    pub async fn drain(&self, queue_name: &str) -> Vec<QueueMessage> {
        let mut inner = self.inner.lock().await;

        inner
            .queues
            .remove(queue_name)
            .map(|queue| queue.into_iter().map(|entry| entry.message).collect())
            .unwrap_or_default()
    }
}

impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, queue_name: &str, message: QueueMessage) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .push_back(Enqueued { sequence, message });

        Ok(())
    }
}
