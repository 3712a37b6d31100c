//! Turns one raw MQTT message into one stored reading.
//!
//! The pipeline fails open: a message that cannot be decoded or stored is
//! logged and dropped. Nothing is retried and nothing is reported back to the
//! broker, which already considers the message delivered.
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::bin_policy;
use crate::decoder;
use crate::error::IngestError;
use crate::store::ReadingStore;
use crate::types::{NewReading, SensorReading};

const EXCERPT_LIMIT: usize = 256;

/// Source of server-side creation timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct Ingestor {
    store: Arc<dyn ReadingStore>,
    default_bin_id: Option<String>,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn ReadingStore>, default_bin_id: Option<String>) -> Self {
        Self::with_clock(store, default_bin_id, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ReadingStore>,
        default_bin_id: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            default_bin_id,
            clock,
        }
    }

    /// Ingest one message, logging and swallowing any failure.
    pub async fn ingest(&self, topic: &str, raw: &[u8]) -> Option<SensorReading> {
        match self.try_ingest(topic, raw).await {
            Ok(reading) => Some(reading),
            Err(IngestError::Decode(e)) => {
                tracing::warn!(
                    topic,
                    payload = %excerpt(raw),
                    error = %e,
                    "dropping undecodable sensor message"
                );
                None
            }
            Err(IngestError::Store(e)) => {
                tracing::error!(
                    topic,
                    payload = %excerpt(raw),
                    error = %e,
                    "dropping sensor reading after store failure"
                );
                None
            }
        }
    }

    pub async fn try_ingest(&self, topic: &str, raw: &[u8]) -> Result<SensorReading, IngestError> {
        tracing::debug!(topic, payload = %excerpt(raw), "sensor message received");
        let payload = decoder::decode(raw)?;

        let bin_id = bin_policy::resolve(payload.bin_id.as_deref(), self.default_bin_id.as_deref());
        if payload.bin_id.as_deref() != Some(bin_id.as_str()) {
            tracing::info!(topic, %bin_id, "bin_id missing; using default");
        }

        let reading = NewReading::from_payload(payload, bin_id, self.clock.now());
        let stored = self.store.insert(reading).await?;
        tracing::info!(
            topic,
            id = stored.id,
            bin_id = %stored.bin_id,
            need_collection = stored.need_collection,
            "sensor reading stored"
        );
        Ok(stored)
    }
}

/// Lossy, length-bounded view of a payload for log lines.
pub fn excerpt(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= EXCERPT_LIMIT {
        return text.into_owned();
    }
    let mut end = EXCERPT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
