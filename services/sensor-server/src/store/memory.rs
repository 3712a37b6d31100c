//! In-memory reading store. Nothing survives a restart.
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ReadingLog, ReadingStore};
use crate::error::StoreResult;
use crate::types::{NewReading, SensorReading};

#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    log: RwLock<ReadingLog>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn insert(&self, reading: NewReading) -> StoreResult<SensorReading> {
        let mut log = self.log.write().await;
        let stored = log.stamp(reading);
        log.push(stored.clone());
        Ok(stored)
    }

    async fn latest_global(&self, limit: usize) -> StoreResult<Vec<SensorReading>> {
        Ok(self.log.read().await.latest_global(limit))
    }

    async fn latest_for_bin(&self, bin_id: &str, limit: usize) -> StoreResult<Vec<SensorReading>> {
        Ok(self.log.read().await.latest_for_bin(bin_id, limit))
    }

    async fn most_recent_for_bin(&self, bin_id: &str) -> StoreResult<Option<SensorReading>> {
        Ok(self.log.read().await.most_recent_for_bin(bin_id))
    }
}
