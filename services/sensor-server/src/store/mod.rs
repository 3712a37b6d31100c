//! Append-only storage for sensor readings.
//!
//! Readings are only ever appended, each one stamped with the next id and a
//! creation time that never goes backwards. Because of that, insertion order is
//! the same as `(created_at, id)` order, and every "latest" query is a reverse
//! walk over the log (or over a bin's slice of it).
//!
//! Two backends implement [`ReadingStore`]:
//! - [`memory::MemoryReadingStore`]: the default, lost on restart.
//! - [`file::FileReadingStore`]: a JSON-lines log replayed on open, so ids keep
//!   increasing across restarts.
//!
//! Both guard their state with a `tokio::sync::RwLock`: one ingestion writer,
//! any number of concurrent HTTP readers.
use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{NewReading, SensorReading};

pub mod file;
pub mod memory;

pub use file::FileReadingStore;
pub use memory::MemoryReadingStore;

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, reading: NewReading) -> StoreResult<SensorReading>;
    /// Newest first across all bins, at most `limit` entries.
    async fn latest_global(&self, limit: usize) -> StoreResult<Vec<SensorReading>>;
    /// Newest first for one bin, at most `limit` entries.
    async fn latest_for_bin(&self, bin_id: &str, limit: usize) -> StoreResult<Vec<SensorReading>>;
    async fn most_recent_for_bin(&self, bin_id: &str) -> StoreResult<Option<SensorReading>>;
}

/// In-memory index shared by both backends.
#[derive(Debug)]
pub(crate) struct ReadingLog {
    readings: Vec<SensorReading>,
    by_bin: HashMap<String, Vec<usize>>,
    next_id: u64,
}

impl Default for ReadingLog {
    fn default() -> Self {
        Self {
            readings: Vec::new(),
            by_bin: HashMap::new(),
            next_id: 1,
        }
    }
}

impl ReadingLog {
    /// Assign the next id and clamp the timestamp to the last stored one.
    /// Does not append; call [`ReadingLog::push`] once the reading is committed.
    pub(crate) fn stamp(&self, mut reading: NewReading) -> SensorReading {
        if let Some(last) = self.readings.last() {
            if reading.created_at < last.created_at {
                reading.created_at = last.created_at;
            }
        }
        reading.into_reading(self.next_id)
    }

    pub(crate) fn push(&mut self, reading: SensorReading) {
        self.next_id = self.next_id.max(reading.id + 1);
        let idx = self.readings.len();
        self.by_bin
            .entry(reading.bin_id.clone())
            .or_default()
            .push(idx);
        self.readings.push(reading);
    }

    /// Retire `id` without storing a reading under it.
    pub(crate) fn burn(&mut self, id: u64) {
        self.next_id = self.next_id.max(id + 1);
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn len(&self) -> usize {
        self.readings.len()
    }

    pub(crate) fn latest_global(&self, limit: usize) -> Vec<SensorReading> {
        self.readings
            .iter()
            .rev()
            .take(effective_limit(limit))
            .cloned()
            .collect()
    }

    pub(crate) fn latest_for_bin(&self, bin_id: &str, limit: usize) -> Vec<SensorReading> {
        let Some(indices) = self.by_bin.get(bin_id) else {
            return Vec::new();
        };
        indices
            .iter()
            .rev()
            .take(effective_limit(limit))
            .map(|&idx| self.readings[idx].clone())
            .collect()
    }

    pub(crate) fn most_recent_for_bin(&self, bin_id: &str) -> Option<SensorReading> {
        self.by_bin
            .get(bin_id)
            .and_then(|indices| indices.last())
            .map(|&idx| self.readings[idx].clone())
    }
}

// limit 0 means "at least one"; callers normally clamp first
fn effective_limit(limit: usize) -> usize {
    limit.max(1)
}
