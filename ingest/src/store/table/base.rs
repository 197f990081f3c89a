use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{IngestError, IngestResult};

/// A row returned by [`TableStore::list_rows`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub row_key: String,
    pub value: Value,
    /// Time of the last write to the row.
    pub timestamp: DateTime<Utc>,
}

/// Key/value table store addressed by `(table, partition key, row key)`.
///
/// Every write is a last-writer-wins upsert. Implementations must be safe to share between
/// concurrently running message handlers.
pub trait TableStore: Send + Sync {
    /// Inserts or replaces a row.
    fn upsert(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        value: Value,
    ) -> impl Future<Output = IngestResult<()>> + Send;

    fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> impl Future<Output = IngestResult<Option<Value>>> + Send;

    /// Deletes a row, returning whether it existed.
    fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> impl Future<Output = IngestResult<bool>> + Send;

    fn list_row_keys(
        &self,
        table: &str,
        partition_key: &str,
    ) -> impl Future<Output = IngestResult<Vec<String>>> + Send;

    fn list_rows(
        &self,
        table: &str,
        partition_key: &str,
    ) -> impl Future<Output = IngestResult<Vec<TableRow>>> + Send;

    /// Deletes every row of `table` last written more than `age` ago and returns how many were
    /// removed.
    fn delete_older_than(
        &self,
        table: &str,
        age: Duration,
    ) -> impl Future<Output = IngestResult<u64>> + Send;

    /// Lists every row of `table` last written more than `age` ago.
    fn list_older_than(
        &self,
        table: &str,
        age: Duration,
    ) -> impl Future<Output = IngestResult<Vec<TableRow>>> + Send;

    fn exists(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> impl Future<Output = IngestResult<bool>> + Send {
        async move { Ok(self.get(table, partition_key, row_key).await?.is_some()) }
    }

    /// Serializes `value` to JSON and upserts it.
    fn upsert_object<V>(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        value: &V,
    ) -> impl Future<Output = IngestResult<()>> + Send
    where
        V: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(IngestError::serialization);
        async move { self.upsert(table, partition_key, row_key, value?).await }
    }

    fn get_object<V>(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> impl Future<Output = IngestResult<Option<V>>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get(table, partition_key, row_key).await? {
                Some(value) => Ok(Some(serde_json::from_value(value)?)),
                None => Ok(None),
            }
        }
    }

    /// Lists and deserializes every row of a partition, keyed by row key.
    fn list_objects<V>(
        &self,
        table: &str,
        partition_key: &str,
    ) -> impl Future<Output = IngestResult<Vec<(String, V)>>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            self.list_rows(table, partition_key)
                .await?
                .into_iter()
                .map(|row| Ok((row.row_key, serde_json::from_value(row.value)?)))
                .collect()
        }
    }

    /// Lists and deserializes every row of `table` last written more than `age` ago.
    fn list_objects_older_than<V>(
        &self,
        table: &str,
        age: Duration,
    ) -> impl Future<Output = IngestResult<Vec<V>>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            self.list_older_than(table, age)
                .await?
                .into_iter()
                .map(|row| Ok(serde_json::from_value(row.value)?))
                .collect()
        }
    }
}
