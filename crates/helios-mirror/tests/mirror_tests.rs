//! Mirror client tests against a throwaway in-process HTTP mirror
//!
//! The mirror mimics the production one: rows come back with string ids
//! and numbers, and an empty table answers 404.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use helios_core::{ChargeState, TelemetryRecord};
use helios_link::{StateDistributor, TelemetryUpdate};
use helios_mirror::{MirrorClient, MirrorConfig, MirrorConsumer, MirrorError, MirrorRecord};
use parking_lot::Mutex;
use serde_json::{json, Value};

type Store = Arc<Mutex<Vec<Value>>>;

async fn create(State(store): State<Store>, Json(mut row): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut rows = store.lock();
    let id = rows.len() + 1;
    if let Value::Object(map) = &mut row {
        map.insert("id".into(), json!(id.to_string()));
        map.insert("date".into(), json!("2025-03-02 10:15:00"));
    }
    rows.push(row);
    (
        StatusCode::CREATED,
        Json(json!({"message": "Data created", "id": id})),
    )
}

async fn list(State(store): State<Store>) -> (StatusCode, Json<Value>) {
    let rows = store.lock();
    if rows.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "Data not found"})),
        );
    }
    (StatusCode::OK, Json(Value::Array(rows.clone())))
}

async fn one(State(store): State<Store>, Path(id): Path<u64>) -> (StatusCode, Json<Value>) {
    let rows = store.lock();
    match rows.iter().find(|row| row["id"] == json!(id.to_string())) {
        Some(row) => (StatusCode::OK, Json(row.clone())),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "Data not found"})),
        ),
    }
}

async fn broken() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": "Error creating data"})),
    )
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!([]))
}

async fn spawn_mirror() -> (String, Store) {
    let store = Store::default();
    let app = Router::new()
        .route("/frames", get(list).post(create))
        .route("/frames/:id", get(one))
        .route("/broken/frames", post(broken))
        .route("/slow/frames", get(slow).post(slow))
        .with_state(store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), store)
}

fn telemetry() -> TelemetryRecord {
    TelemetryRecord::from_pairs([
        ("east", 512),
        ("west", 498),
        ("v_panel", 182),
        ("charging", 1),
        ("full", 0),
        ("empty", 0),
        ("angle_elev", 45),
    ])
}

#[tokio::test]
async fn test_send_then_fetch() {
    let (url, store) = spawn_mirror().await;
    let client = MirrorClient::new(&MirrorConfig::new(url)).unwrap();

    let ack = client
        .send(&MirrorRecord::from_record(&telemetry()))
        .await
        .unwrap();
    assert_eq!(ack.id, Some(1));

    // Raw flags never reach the mirror
    let stored = store.lock()[0].clone();
    assert_eq!(stored["charge_state"], json!("charging"));
    assert!(stored.get("charging").is_none());
    assert!(stored.get("full").is_none());

    let record = client.fetch(1).await.unwrap().unwrap();
    assert_eq!(record.id, Some(1));
    assert!(record.date.is_some());
    assert_eq!(record.charge_state, ChargeState::Charging);
    assert_eq!(record.get("angle_elev"), Some(45));
}

#[tokio::test]
async fn test_fetch_missing_is_none() {
    let (url, _store) = spawn_mirror().await;
    let client = MirrorClient::new(&MirrorConfig::new(url)).unwrap();
    assert!(client.fetch(99).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fetch_all() {
    let (url, _store) = spawn_mirror().await;
    let client = MirrorClient::new(&MirrorConfig::new(url)).unwrap();

    assert!(client.fetch_all().await.unwrap().is_empty());

    for _ in 0..2 {
        client
            .send(&MirrorRecord::from_record(&telemetry()))
            .await
            .unwrap();
    }
    let all = client.fetch_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].id, Some(2));
}

#[tokio::test]
async fn test_server_error_status() {
    let (url, _store) = spawn_mirror().await;
    let client = MirrorClient::new(&MirrorConfig::new(format!("{url}/broken"))).unwrap();

    let err = client
        .send(&MirrorRecord::from_record(&telemetry()))
        .await
        .unwrap_err();
    match err {
        MirrorError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Error creating data");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_timeout() {
    let (url, _store) = spawn_mirror().await;
    let config = MirrorConfig::new(format!("{url}/slow")).with_timeout(Duration::from_millis(100));
    let client = MirrorClient::new(&config).unwrap();

    let err = client.fetch_all().await.unwrap_err();
    assert!(matches!(err, MirrorError::Http(ref e) if e.is_timeout()));
}

#[tokio::test]
async fn test_consumer_uploads_dispatched_records() {
    let (url, store) = spawn_mirror().await;
    let client = MirrorClient::new(&MirrorConfig::new(url)).unwrap();
    let (consumer, uploads) = MirrorConsumer::spawn(client, 8);

    let distributor = StateDistributor::new();
    distributor.register(Arc::new(consumer));
    let (_, report) = distributor.dispatch(telemetry());
    assert!(report.is_clean());

    // Dropping the distributor drops the consumer and ends the upload task
    drop(distributor);
    let stats = uploads.await.unwrap();
    assert_eq!(stats.uploaded, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(store.lock().len(), 1);
}

#[tokio::test]
async fn test_full_queue_drops_records() {
    let (url, _store) = spawn_mirror().await;
    let config = MirrorConfig::new(format!("{url}/slow")).with_timeout(Duration::from_millis(200));
    let client = MirrorClient::new(&config).unwrap();
    let (consumer, uploads) = MirrorConsumer::spawn(client, 1);

    let distributor = StateDistributor::new();
    distributor.register(Arc::new(consumer));

    let reports: Vec<_> = (0..3)
        .map(|_| distributor.dispatch(telemetry()).1)
        .collect();
    assert!(reports[0].is_clean());
    assert_eq!(reports[2].failed, vec!["mirror".to_string()]);

    drop(distributor);
    let stats = uploads.await.unwrap();
    assert!(stats.failed >= 1);
    assert_eq!(stats.uploaded, 0);
}

#[test]
fn test_update_and_record_agree() {
    let update = TelemetryUpdate::new(telemetry());
    assert_eq!(
        MirrorRecord::from_update(&update),
        MirrorRecord::from_record(&telemetry())
    );
}
