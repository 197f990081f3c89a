use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::IngestResult;
use crate::store::document::{DocumentFilter, DocumentStore, SegmentSlice};
use crate::types::{DataObjectIdentifier, Document};

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<DataObjectIdentifier, Document>>,
}

/// In-memory [`DocumentStore`] with one collection per object type.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every document of `object_type_name` ordered by identifier.
    pub async fn documents(&self, object_type_name: &str) -> Vec<Document> {
        let inner = self.inner.lock().await;

        inner
            .collections
            .get(object_type_name)
            .map(|collection| collection.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn slice_of(identifier: &DataObjectIdentifier, total: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    identifier.hash(&mut hasher);

    (hasher.finish() % u64::from(total.max(1))) as u32
}

impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, object_type_name: &str, document: Document) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .collections
            .entry(object_type_name.to_string())
            .or_default()
            .insert(document.identifier(), document);

        Ok(())
    }

    async fn delete(
        &self,
        object_type_name: &str,
        identifier: &DataObjectIdentifier,
    ) -> IngestResult<bool> {
        let mut inner = self.inner.lock().await;

        Ok(inner
            .collections
            .get_mut(object_type_name)
            .and_then(|collection| collection.remove(identifier))
            .is_some())
    }

    async fn get(
        &self,
        object_type_name: &str,
        identifier: &DataObjectIdentifier,
    ) -> IngestResult<Option<Document>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .collections
            .get(object_type_name)
            .and_then(|collection| collection.get(identifier))
            .cloned())
    }

    async fn get_identifiers(
        &self,
        object_type_name: &str,
        filter: &DocumentFilter,
        slice: Option<SegmentSlice>,
    ) -> IngestResult<Vec<DataObjectIdentifier>> {
        let inner = self.inner.lock().await;

        let Some(collection) = inner.collections.get(object_type_name) else {
            return Ok(vec![]);
        };

        Ok(collection
            .iter()
            .filter(|(identifier, document)| {
                filter.matches(document)
                    && slice.is_none_or(|slice| slice_of(identifier, slice.total) == slice.index)
            })
            .map(|(identifier, _)| identifier.clone())
            .collect())
    }

    async fn get_documents(
        &self,
        object_type_name: &str,
        filter: &DocumentFilter,
    ) -> IngestResult<Vec<Document>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .collections
            .get(object_type_name)
            .map(|collection| {
                collection
                    .values()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(
        &self,
        object_type_name: &str,
        filter: Option<&DocumentFilter>,
    ) -> IngestResult<u64> {
        let inner = self.inner.lock().await;

        let Some(collection) = inner.collections.get(object_type_name) else {
            return Ok(0);
        };

        let count = match filter {
            Some(filter) => collection
                .values()
                .filter(|document| filter.matches(document))
                .count(),
            None => collection.len(),
        };

        Ok(count as u64)
    }

    async fn object_type_names(&self) -> IngestResult<Vec<String>> {
        let inner = self.inner.lock().await;

        let mut names: Vec<String> = inner.collections.keys().cloned().collect();
        names.sort();

        Ok(names)
    }
}
