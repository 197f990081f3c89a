use crate::error::{ErrorKind, IngestError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The error is propagated so the transport redelivers the message.
    Redeliver,
    /// The message is reported as handled and never retried.
    NoRetry,
}

/// What happens to the type lock of the failing batch.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LockAction {
    /// The lock is left alone. Either it is already gone or the batch never held it.
    Keep,
    /// The lock is released and the batch is canceled, which aborts it.
    ReleaseAndCancel,
    /// The lock is released. The batch is canceled only when `cancel_on_exception` is set.
    ReleaseCancelIfConfigured,
}

/// Policy describing how an [`IngestError`] raised by a stage should be handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    lock_action: LockAction,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, lock_action: LockAction) -> Self {
        Self {
            retry_directive,
            lock_action,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    pub fn lock_action(&self) -> LockAction {
        self.lock_action
    }

    /// Returns `true` when the error terminates the batch instead of being retried.
    pub fn is_terminal(&self) -> bool {
        self.retry_directive == RetryDirective::NoRetry
    }
}

/// Builds an [`ErrorHandlingPolicy`] from an [`IngestError`] to determine in a unified way how
/// stage failures are handled.
pub fn build_error_handling_policy(error: &IngestError) -> ErrorHandlingPolicy {
    match error.kind() {
        // The batch was canceled or lost its lock to a reaper, which already released the lock
        // and scheduled the abort.
        ErrorKind::BatchCanceled | ErrorKind::LockLost => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, LockAction::Keep)
        }

        // The purge would delete too much. The batch is aborted.
        ErrorKind::DeleteSanityCheckFailed => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, LockAction::ReleaseAndCancel)
        }

        // Special handling for fault injection tests.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => ErrorHandlingPolicy::new(RetryDirective::NoRetry, LockAction::Keep),
        #[cfg(feature = "failpoints")]
        ErrorKind::WithRetry => ErrorHandlingPolicy::new(
            RetryDirective::Redeliver,
            LockAction::ReleaseCancelIfConfigured,
        ),

        _ => ErrorHandlingPolicy::new(
            RetryDirective::Redeliver,
            LockAction::ReleaseCancelIfConfigured,
        ),
    }
}
