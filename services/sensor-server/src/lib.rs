use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod bin_policy;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod query;
pub mod session;
pub mod store;
pub mod types;

use crate::handlers::SharedState;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readings", get(handlers::latest_readings))
        .route("/readings/latest", get(handlers::most_recent_reading))
        // path used by the dashboard frontend
        .route("/api/readings", get(handlers::latest_readings))
        .route("/api/readings/latest", get(handlers::most_recent_reading))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http",
                    %request_id,
                    method = %req.method(),
                    uri = %req.uri(),
                )
            }),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
