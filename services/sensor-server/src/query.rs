use std::sync::Arc;

use crate::error::{ClientRequestError, QueryError};
use crate::store::ReadingStore;
use crate::types::SensorReading;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 500;

/// Clamp a caller-supplied limit to `[1, MAX_LIMIT]`; `None` means the default.
pub fn clamp_limit(limit: Option<i64>) -> usize {
    match limit {
        None => DEFAULT_LIMIT,
        Some(n) => n.clamp(1, MAX_LIMIT as i64) as usize,
    }
}

fn required_bin_id(bin_id: Option<&str>) -> Result<&str, ClientRequestError> {
    bin_id
        .filter(|b| !b.trim().is_empty())
        .ok_or(ClientRequestError::MissingBinId)
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn ReadingStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Newest readings for one bin. There is no "all bins" variant: a missing
    /// or blank bin id is a client error.
    pub async fn get_latest(
        &self,
        bin_id: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<SensorReading>, QueryError> {
        let bin_id = required_bin_id(bin_id)?;
        Ok(self.store.latest_for_bin(bin_id, clamp_limit(limit)).await?)
    }

    /// `Ok(None)` when the bin has no readings yet.
    pub async fn get_most_recent(
        &self,
        bin_id: Option<&str>,
    ) -> Result<Option<SensorReading>, QueryError> {
        let bin_id = required_bin_id(bin_id)?;
        Ok(self.store.most_recent_for_bin(bin_id).await?)
    }
}
