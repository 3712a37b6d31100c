use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Inbound MQTT payload, as published by the bin firmware
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorPayload {
    #[serde(default)]
    pub bin_id: Option<String>,
    #[serde(default)]
    pub distance_mm: i32,
    #[serde(default)]
    pub weight_g: f64,
    #[serde(default)]
    pub water_adc: i32,
    #[serde(default)]
    pub need_collection: bool,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

/// A reading that has passed bin resolution but has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub bin_id: String,
    pub distance_mm: i32,
    pub weight_g: f64,
    pub water_adc: i32,
    pub need_collection: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl NewReading {
    pub fn from_payload(payload: SensorPayload, bin_id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            bin_id,
            distance_mm: payload.distance_mm,
            weight_g: payload.weight_g,
            water_adc: payload.water_adc,
            need_collection: payload.need_collection,
            lat: payload.lat,
            lng: payload.lng,
            created_at,
        }
    }

    pub(crate) fn into_reading(self, id: u64) -> SensorReading {
        SensorReading {
            id,
            bin_id: self.bin_id,
            distance_mm: self.distance_mm,
            weight_g: self.weight_g,
            water_adc: self.water_adc,
            need_collection: self.need_collection,
            lat: self.lat,
            lng: self.lng,
            created_at: self.created_at,
        }
    }
}

// Persisted reading; also the HTTP response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub id: u64,
    pub bin_id: String,
    pub distance_mm: i32,
    pub weight_g: f64,
    pub water_adc: i32,
    pub need_collection: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at: DateTime<Utc>,
}

// Query string for GET /readings and /readings/latest
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingsQuery {
    pub bin_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub status: &'static str,
    pub mqtt: String,
}
