//! Logging and metrics setup for ingestion processes.

pub mod metrics;
pub mod tracing;
