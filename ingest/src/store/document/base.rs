use std::future::Future;

use crate::error::IngestResult;
use crate::store::document::DocumentFilter;
use crate::types::{DataObjectIdentifier, Document};

/// One slice of a deterministic partitioning of the identifier space.
///
/// Slices `0..total` of the same filter are disjoint and together cover every matching document,
/// and a document stays in the same slice while other slices are being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSlice {
    /// Zero-based slice index.
    pub index: u32,
    pub total: u32,
}

/// Store holding the raw documents of every object type.
pub trait DocumentStore: Send + Sync {
    fn upsert(
        &self,
        object_type_name: &str,
        document: Document,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    /// Hard-deletes a document, returning whether it existed.
    fn delete(
        &self,
        object_type_name: &str,
        identifier: &DataObjectIdentifier,
    ) -> impl Future<Output = IngestResult<bool>> + Send;

    fn get(
        &self,
        object_type_name: &str,
        identifier: &DataObjectIdentifier,
    ) -> impl Future<Output = IngestResult<Option<Document>>> + Send;

    /// Returns the identifiers of documents matching `filter`, restricted to `slice` when given.
    fn get_identifiers(
        &self,
        object_type_name: &str,
        filter: &DocumentFilter,
        slice: Option<SegmentSlice>,
    ) -> impl Future<Output = IngestResult<Vec<DataObjectIdentifier>>> + Send;

    fn get_documents(
        &self,
        object_type_name: &str,
        filter: &DocumentFilter,
    ) -> impl Future<Output = IngestResult<Vec<Document>>> + Send;

    /// Counts documents matching `filter`, or all documents of the type.
    fn count(
        &self,
        object_type_name: &str,
        filter: Option<&DocumentFilter>,
    ) -> impl Future<Output = IngestResult<u64>> + Send;

    fn object_type_names(&self) -> impl Future<Output = IngestResult<Vec<String>>> + Send;
}
