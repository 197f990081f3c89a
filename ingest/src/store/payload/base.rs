use std::future::Future;

use crate::error::IngestResult;
use crate::types::{IncomingRecord, PayloadLocation};

/// Source of parsed payload records.
///
/// Implementations own fetching, parsing and hashing. The pipeline only consumes the identity,
/// hash and body of each record.
pub trait PayloadSource: Send + Sync {
    fn load(
        &self,
        location: &PayloadLocation,
    ) -> impl Future<Output = IngestResult<Vec<IncomingRecord>>> + Send;

    /// Deletes a payload, returning whether it existed.
    fn delete(
        &self,
        location: &PayloadLocation,
    ) -> impl Future<Output = IngestResult<bool>> + Send;
}
