//! Metrics definitions for batch ingestion monitoring.
//!
//! Values are emitted through the `metrics` facade. The embedding process decides where they go,
//! see `ingest_telemetry::metrics`.

/// Tracing target of monitor-sink events: batch start, batch completion and failures.
///
/// Operators reconstruct the path of a batch from the events logged under this target.
pub const MONITOR_TARGET: &str = "ingest::monitor";

/// Label for the pipeline stage in metrics.
pub const STAGE_LABEL: &str = "stage";

/// Label for the data object type in metrics.
pub const OBJECT_TYPE_LABEL: &str = "object_type";

/// Label for the handling outcome of a message.
pub const OUTCOME_LABEL: &str = "outcome";

/// Label for the change type of a change notification.
pub const CHANGE_TYPE_LABEL: &str = "change_type";

/// Label for the error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

// Pipeline metrics

/// Counter for stage messages handled, by outcome.
pub const INGEST_MESSAGES_HANDLED_TOTAL: &str = "ingest_messages_handled_total";

/// Counter for stage messages that failed with an error.
pub const INGEST_MESSAGE_ERRORS_TOTAL: &str = "ingest_message_errors_total";

/// Counter for stages whose segments all completed.
pub const INGEST_STAGE_COMPLETIONS_TOTAL: &str = "ingest_stage_completions_total";

// Lock metrics

/// Counter for lock acquisitions lost to another batch.
pub const INGEST_LOCK_DENIED_TOTAL: &str = "ingest_lock_denied_total";

/// Counter for batches marked as canceled.
pub const INGEST_BATCHES_CANCELED_TOTAL: &str = "ingest_batches_canceled_total";

// Change notification metrics

/// Counter for change notification messages sent.
pub const INGEST_CHANGE_NOTIFICATIONS_TOTAL: &str = "ingest_change_notifications_total";

// Housekeeping metrics

/// Counter for rows and documents removed by housekeeping sweeps.
pub const INGEST_HOUSEKEEPING_REMOVED_TOTAL: &str = "ingest_housekeeping_removed_total";
