use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};

/// Evaluated after a segment's primary work ran, before it is recorded as completed.
pub const COORDINATOR_BEFORE_SEGMENT_COMPLETED: &str = "coordinator.before_segment_completed";

/// Evaluated before a stage continuation enqueues the next stage.
pub const PIPELINE_BEFORE_FORWARD: &str = "pipeline.before_forward";

pub fn ingest_fail_point(name: &str) -> IngestResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::WithNoRetry;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "retry" => ErrorKind::WithRetry,
                _ => ErrorKind::WithNoRetry,
            }
        }

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
