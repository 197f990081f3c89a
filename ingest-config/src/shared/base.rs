use thiserror::Error;

/// Errors returned when validating an ingestion configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value that violates a constraint.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Two stages were configured to consume the same queue.
    #[error("queue `{0}` is configured for more than one stage")]
    DuplicateQueueName(String),
}

/// Returns an error when `value` is zero.
pub(crate) fn ensure_non_zero(field: &str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: "must be greater than 0".to_string(),
        });
    }

    Ok(())
}

/// Returns an error when `value` is not a percentage in `0..=100`.
pub(crate) fn ensure_percentage(field: &str, value: u32) -> Result<(), ValidationError> {
    if value > 100 {
        return Err(ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: "must be between 0 and 100".to_string(),
        });
    }

    Ok(())
}
