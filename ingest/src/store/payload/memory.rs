use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::store::payload::PayloadSource;
use crate::types::{IncomingRecord, PayloadLocation};

/// In-memory [`PayloadSource`] serving records registered with [`MemoryPayloadSource::insert`].
#[derive(Debug, Clone, Default)]
pub struct MemoryPayloadSource {
    payloads: Arc<Mutex<HashMap<PayloadLocation, Vec<IncomingRecord>>>>,
}

impl MemoryPayloadSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, location: PayloadLocation, records: Vec<IncomingRecord>) {
        self.payloads.lock().await.insert(location, records);
    }
}

impl PayloadSource for MemoryPayloadSource {
    async fn load(&self, location: &PayloadLocation) -> IngestResult<Vec<IncomingRecord>> {
        let payloads = self.payloads.lock().await;

        match payloads.get(location) {
            Some(records) => Ok(records.clone()),
            None => bail!(
                ErrorKind::PayloadUnavailable,
                "Payload not found",
                location
            ),
        }
    }

    async fn delete(&self, location: &PayloadLocation) -> IngestResult<bool> {
        Ok(self.payloads.lock().await.remove(location).is_some())
    }
}
