use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::sync::watch;

use crate::error::QueryError;
use crate::query::QueryService;
use crate::session::SessionState;
use crate::types::{HealthResp, ReadingsQuery, SensorReading};

pub struct AppState {
    pub queries: QueryService,
    pub session: watch::Receiver<SessionState>,
}

pub type SharedState = Arc<AppState>;

fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

pub async fn healthz(State(state): State<SharedState>) -> Json<HealthResp> {
    let mqtt = state.session.borrow().to_string();
    Json(HealthResp { status: "ok", mqtt })
}

// GET /readings?binId=&limit=
pub async fn latest_readings(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<Vec<SensorReading>>, QueryError> {
    let request_id = request_id(&headers);
    let readings = state
        .queries
        .get_latest(params.bin_id.as_deref(), params.limit)
        .await
        .inspect_err(|e| tracing::warn!(%request_id, error = %e, "readings query rejected"))?;
    tracing::debug!(%request_id, bin_id = ?params.bin_id, count = readings.len(), "readings served");
    Ok(Json(readings))
}

// GET /readings/latest?binId=
pub async fn most_recent_reading(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<ReadingsQuery>,
) -> Result<Response, QueryError> {
    let request_id = request_id(&headers);
    let reading = state
        .queries
        .get_most_recent(params.bin_id.as_deref())
        .await
        .inspect_err(|e| tracing::warn!(%request_id, error = %e, "latest reading query rejected"))?;
    Ok(match reading {
        Some(reading) => Json(reading).into_response(),
        None => {
            tracing::debug!(%request_id, bin_id = ?params.bin_id, "no readings for bin");
            StatusCode::NO_CONTENT.into_response()
        }
    })
}
