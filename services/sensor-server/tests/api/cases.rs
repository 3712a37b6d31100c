use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use sensor_server::build_router;
use sensor_server::handlers::AppState;
use sensor_server::ingest::Ingestor;
use sensor_server::query::QueryService;
use sensor_server::session::SessionState;
use sensor_server::store::{MemoryReadingStore, ReadingStore};
use serde_json::Value;
use tokio::sync::watch;
use tower::util::ServiceExt; // for `oneshot`

const BIN_A: &str = r#"{"bin_id":"Bin-A","distance_mm":100,"weight_g":20.5,"water_adc":300,"need_collection":false}"#;

struct Harness {
    app: Router,
    ingestor: Ingestor,
    store: Arc<MemoryReadingStore>,
}

fn harness(default_bin_id: Option<&str>) -> Harness {
    let store = Arc::new(MemoryReadingStore::new());
    let shared: Arc<dyn ReadingStore> = store.clone();
    let (_tx, rx) = watch::channel(SessionState::Subscribed);
    let app = build_router(Arc::new(AppState {
        queries: QueryService::new(Arc::clone(&shared)),
        session: rx,
    }));
    let ingestor = Ingestor::new(shared, default_bin_id.map(str::to_string));
    Harness {
        app,
        ingestor,
        store,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    (status, bytes.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, bytes) = get(app, uri).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn payload(bin: &str, distance_mm: i32) -> Vec<u8> {
    format!(r#"{{"bin_id":"{bin}","distance_mm":{distance_mm},"weight_g":1.0,"water_adc":0}}"#)
        .into_bytes()
}

#[tokio::test]
async fn healthz_reports_session_state() {
    let h = harness(None);
    let (status, body) = get_json(&h.app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mqtt"], "subscribed");
}

#[tokio::test]
async fn ingested_reading_is_served_with_all_fields() {
    let h = harness(None);
    h.ingestor.ingest("bins/sensors", BIN_A.as_bytes()).await.unwrap();

    let (status, body) = get_json(&h.app, "/readings/latest?binId=Bin-A").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["binId"], "Bin-A");
    assert_eq!(body["distanceMm"], 100);
    assert_eq!(body["weightG"], 20.5);
    assert_eq!(body["waterAdc"], 300);
    assert_eq!(body["needCollection"], false);
    assert!(body["lat"].is_null());
    assert!(body["lng"].is_null());
    assert!(body["id"].as_u64().is_some());
    let created = body["createdAt"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(created).is_ok());
}

#[tokio::test]
async fn missing_bin_id_is_stored_under_default() {
    let h = harness(Some("Bin-Master"));
    let no_bin = r#"{"distance_mm":100,"weight_g":20.5,"water_adc":300,"need_collection":false}"#;
    h.ingestor.ingest("bins/sensors", no_bin.as_bytes()).await.unwrap();

    let (status, body) = get_json(&h.app, "/readings/latest?binId=Bin-Master").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["binId"], "Bin-Master");
}

#[tokio::test]
async fn malformed_message_adds_nothing() {
    let h = harness(None);
    assert!(h.ingestor.ingest("bins/sensors", b"{oops").await.is_none());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn latest_and_most_recent_follow_insertion_order() {
    let h = harness(None);
    for d in [1, 2, 3] {
        h.ingestor.ingest("t", &payload("Bin-A", d)).await.unwrap();
    }
    h.ingestor.ingest("t", &payload("Bin-B", 99)).await.unwrap();

    let (status, body) = get_json(&h.app, "/readings/latest?binId=Bin-A").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distanceMm"], 3);

    let (status, body) = get_json(&h.app, "/readings?binId=Bin-A&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["distanceMm"], 3);
    assert_eq!(list[1]["distanceMm"], 2);
    assert!(list[0]["id"].as_u64().unwrap() > list[1]["id"].as_u64().unwrap());
}

#[tokio::test]
async fn unknown_bin_is_no_content() {
    let h = harness(None);
    h.ingestor.ingest("t", BIN_A.as_bytes()).await.unwrap();
    let (status, body) = get(&h.app, "/readings/latest?binId=Bin-Z").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn missing_bin_id_is_bad_request() {
    let h = harness(None);
    h.ingestor.ingest("t", BIN_A.as_bytes()).await.unwrap();
    for uri in [
        "/readings",
        "/readings?limit=5",
        "/readings?binId=",
        "/readings?binId=%20%20",
        "/readings/latest",
        "/readings/latest?binId=",
    ] {
        let (status, _) = get(&h.app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn limit_is_clamped() {
    let h = harness(None);
    for d in 0..510 {
        h.ingestor.ingest("t", &payload("Bin-A", d)).await.unwrap();
    }

    let (_, body) = get_json(&h.app, "/readings?binId=Bin-A&limit=10000").await;
    assert_eq!(body.as_array().unwrap().len(), 500);

    let (_, body) = get_json(&h.app, "/readings?binId=Bin-A&limit=0").await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = get_json(&h.app, "/readings?binId=Bin-A&limit=-4").await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = get_json(&h.app, "/readings?binId=Bin-A").await;
    assert_eq!(body.as_array().unwrap().len(), 50);
}

#[tokio::test]
async fn dashboard_api_prefix_is_served() {
    let h = harness(None);
    h.ingestor.ingest("t", BIN_A.as_bytes()).await.unwrap();
    let (status, body) = get_json(&h.app, "/api/readings/latest?binId=Bin-A").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["binId"], "Bin-A");
    let (status, body) = get_json(&h.app, "/api/readings?binId=Bin-A").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn responses_carry_request_id() {
    let h = harness(None);
    let resp = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(resp.headers().contains_key("x-request-id"));
}
