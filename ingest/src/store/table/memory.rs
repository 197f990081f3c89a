use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::store::table::{TableRow, TableStore};

#[derive(Debug, Clone)]
struct StoredRow {
    value: Value,
    timestamp: DateTime<Utc>,
}

type Partitions = BTreeMap<String, BTreeMap<String, StoredRow>>;

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Partitions>,
}

/// In-memory [`TableStore`].
///
/// Rows are ordered by partition key and row key. All data is lost when the last clone is
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows currently stored in `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table)
            .map(|partitions| partitions.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    /// Moves the write timestamp of every row in `table` `by` into the past.
    pub async fn backdate_rows(&self, table: &str, by: Duration) -> IngestResult<()> {
        let delta = to_time_delta(by)?;
        let mut inner = self.inner.lock().await;

        if let Some(partitions) = inner.tables.get_mut(table) {
            for row in partitions.values_mut().flat_map(BTreeMap::values_mut) {
                row.timestamp -= delta;
            }
        }

        Ok(())
    }
}

impl TableStore for MemoryTableStore {
    async fn upsert(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        value: Value,
    ) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .entry(partition_key.to_string())
            .or_default()
            .insert(
                row_key.to_string(),
                StoredRow {
                    value,
                    timestamp: Utc::now(),
                },
            );

        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> IngestResult<Option<Value>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .and_then(|partitions| partitions.get(partition_key))
            .and_then(|rows| rows.get(row_key))
            .map(|row| row.value.clone()))
    }

    async fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> IngestResult<bool> {
        let mut inner = self.inner.lock().await;

        let Some(partitions) = inner.tables.get_mut(table) else {
            return Ok(false);
        };
        let Some(rows) = partitions.get_mut(partition_key) else {
            return Ok(false);
        };

        let removed = rows.remove(row_key).is_some();
        if rows.is_empty() {
            partitions.remove(partition_key);
        }

        Ok(removed)
    }

    async fn list_row_keys(&self, table: &str, partition_key: &str) -> IngestResult<Vec<String>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .and_then(|partitions| partitions.get(partition_key))
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_rows(&self, table: &str, partition_key: &str) -> IngestResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .and_then(|partitions| partitions.get(partition_key))
            .map(|rows| {
                rows.iter()
                    .map(|(row_key, row)| TableRow {
                        row_key: row_key.clone(),
                        value: row.value.clone(),
                        timestamp: row.timestamp,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_older_than(&self, table: &str, age: Duration) -> IngestResult<Vec<TableRow>> {
        let cutoff = Utc::now() - to_time_delta(age)?;
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .into_iter()
            .flat_map(|partitions| partitions.values())
            .flat_map(|rows| rows.iter())
            .filter(|(_, row)| row.timestamp < cutoff)
            .map(|(row_key, row)| TableRow {
                row_key: row_key.clone(),
                value: row.value.clone(),
                timestamp: row.timestamp,
            })
            .collect())
    }

    async fn delete_older_than(&self, table: &str, age: Duration) -> IngestResult<u64> {
        let cutoff = Utc::now() - to_time_delta(age)?;
        let mut inner = self.inner.lock().await;

        let Some(partitions) = inner.tables.get_mut(table) else {
            return Ok(0);
        };

        let mut removed = 0;
        for rows in partitions.values_mut() {
            let before = rows.len();
            rows.retain(|_, row| row.timestamp >= cutoff);
            removed += (before - rows.len()) as u64;
        }
        partitions.retain(|_, rows| !rows.is_empty());

        Ok(removed)
    }
}

fn to_time_delta(duration: Duration) -> IngestResult<TimeDelta> {
    TimeDelta::from_std(duration).map_err(|err| {
        ingest_error!(
            ErrorKind::ConversionError,
            "Duration out of range",
            format!("{duration:?}"),
            source: err
        )
    })
}
