use std::sync::Arc;

use ingest_config::shared::IngestConfig;
use tracing::debug;

use crate::change::ChangeHandler;
use crate::error::IngestResult;
use crate::housekeeping::Housekeeper;
use crate::pipeline::{BatchPipeline, MessageOutcome, Stage};
use crate::store::document::DocumentStore;
use crate::store::payload::PayloadSource;
use crate::store::queue::MessageQueue;
use crate::store::table::TableStore;

/// Outcome of [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Stage(MessageOutcome),
    ChangeApplied,
}

/// Entry point of the ingestion core: routes every received message to its handler.
#[derive(Debug, Clone)]
pub struct Dispatcher<T, Q, D, P> {
    pipeline: BatchPipeline<T, Q, D, P>,
    changes: ChangeHandler<T, Q, D, P>,
    housekeeper: Housekeeper<T, D, P>,
    config: Arc<IngestConfig>,
}

impl<T, Q, D, P> Dispatcher<T, Q, D, P>
where
    T: TableStore + Clone,
    Q: MessageQueue + Clone,
    D: DocumentStore + Clone,
    P: PayloadSource + Clone,
{
    /// Validates `config` and wires every handler to the given stores.
    pub fn new(
        tables: T,
        queue: Q,
        documents: D,
        payloads: P,
        config: IngestConfig,
    ) -> IngestResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let changes = ChangeHandler::new(
            tables.clone(),
            queue.clone(),
            documents.clone(),
            payloads.clone(),
            config.clone(),
        );
        let housekeeper = Housekeeper::new(
            tables.clone(),
            documents.clone(),
            payloads.clone(),
            config.clone(),
        );
        let pipeline = BatchPipeline::new(tables, queue, documents, payloads, config.clone());

        Ok(Self {
            pipeline,
            changes,
            housekeeper,
            config,
        })
    }

    /// Handles a message received on `queue_name`.
    ///
    /// Returns an error when the message should be redelivered, or when no handler consumes
    /// `queue_name`.
    pub async fn dispatch(&self, queue_name: &str, body: &str) -> IngestResult<DispatchOutcome> {
        debug!(queue = queue_name, "dispatching message");

        if queue_name == self.config.queues.receive_change {
            self.changes.handle_message(body).await?;
            return Ok(DispatchOutcome::ChangeApplied);
        }

        let outcome = self.pipeline.handle_message(queue_name, body).await?;

        Ok(DispatchOutcome::Stage(outcome))
    }

    /// Names of every queue the dispatcher consumes.
    pub fn queue_names(&self) -> Vec<&str> {
        let mut queue_names: Vec<&str> = Stage::ALL
            .iter()
            .map(|stage| stage.queue_name(&self.config.queues))
            .collect();
        queue_names.push(&self.config.queues.receive_change);

        queue_names
    }

    pub fn pipeline(&self) -> &BatchPipeline<T, Q, D, P> {
        &self.pipeline
    }

    pub fn housekeeper(&self) -> &Housekeeper<T, D, P> {
        &self.housekeeper
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }
}
