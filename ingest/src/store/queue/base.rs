use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{IngestError, IngestResult};

/// A message to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    /// JSON body.
    pub body: String,
    /// Subscription filter label, used by topics.
    pub label: Option<String>,
    /// The message must not be delivered before this time.
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
}

impl QueueMessage {
    /// Serializes `value` as the JSON body of a new message.
    pub fn json<T>(value: &T) -> IngestResult<Self>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            body: serde_json::to_string(value).map_err(IngestError::serialization)?,
            label: None,
            scheduled_enqueue_time: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn scheduled_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_enqueue_time = Some(time);
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> IngestResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Durable message queue with at-least-once delivery.
pub trait MessageQueue: Send + Sync {
    fn enqueue(
        &self,
        queue_name: &str,
        message: QueueMessage,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    fn enqueue_json<T>(
        &self,
        queue_name: &str,
        value: &T,
    ) -> impl Future<Output = IngestResult<()>> + Send
    where
        T: Serialize + ?Sized,
    {
        let message = QueueMessage::json(value);
        async move { self.enqueue(queue_name, message?).await }
    }
}
