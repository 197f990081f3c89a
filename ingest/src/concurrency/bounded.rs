use std::future::Future;

use futures::{StreamExt, stream};

use crate::error::{IngestError, IngestResult};

/// Runs `task` for every item with at most `max_in_flight` tasks pending at once.
///
/// Every task runs to completion even when others fail. Failures are returned together as one
/// aggregated [`IngestError`].
pub async fn for_each_bounded<I, F, Fut>(
    items: I,
    max_in_flight: usize,
    task: F,
) -> IngestResult<()>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = IngestResult<()>>,
{
    let errors: Vec<IngestError> = stream::iter(items)
        .map(task)
        .buffer_unordered(max_in_flight.max(1))
        .filter_map(|result| async move { result.err() })
        .collect()
        .await;

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

/// Like [`for_each_bounded`], but collects the task outputs in input order.
pub async fn map_bounded<I, F, Fut, T>(
    items: I,
    max_in_flight: usize,
    task: F,
) -> IngestResult<Vec<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = IngestResult<T>>,
{
    let results: Vec<IngestResult<T>> = stream::iter(items)
        .map(task)
        .buffered(max_in_flight.max(1))
        .collect()
        .await;

    let mut outputs = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(output) => outputs.push(output),
            Err(err) => errors.push(err),
        }
    }

    if errors.is_empty() {
        Ok(outputs)
    } else {
        Err(errors.into())
    }
}
