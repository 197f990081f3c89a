//! Coordination core for raw batch ingestion.
//!
//! Full batches arrive as segmented messages and move through the stages of a
//! [`pipeline::BatchPipeline`]. A [`lock::TypeLockManager`] serializes batches of the same
//! object type and a [`coordinator::SegmentCoordinator`] runs each segment of a stage at most
//! once. Incremental changes bypass the pipeline through [`change::ChangeHandler`]. The
//! [`dispatch::Dispatcher`] routes received messages to both.

pub mod broadcast;
pub mod change;
pub mod concurrency;
pub mod coordinator;
pub mod dispatch;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod housekeeping;
pub mod ingestor;
pub mod lock;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod store;
pub mod types;
