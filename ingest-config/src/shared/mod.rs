//! Shared configuration types for the ingestion pipeline.

mod base;
mod batch;
mod documents;
mod ingest;
mod purge;
mod queues;
mod retention;
mod tables;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use documents::DocumentConfig;
pub use ingest::IngestConfig;
pub use purge::PurgeConfig;
pub use queues::QueueConfig;
pub use retention::RetentionConfig;
pub use tables::TableConfig;
