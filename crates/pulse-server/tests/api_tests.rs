use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, TimeZone, Utc};
use pulse_alert::MemoryAlertStore;
use pulse_registry::IndicatorRegistry;
use pulse_server::AppState;
use pulse_timeseries::{
    MemoryScoreStore, PartitionedSnapshotStore, QueryService, RiskScoreStore, SnapshotStore,
};
use pulse_types::{Indicator, RiskScore, Severity, Snapshot, SCHEMA_VERSION};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const ID: &str = "freight_cost_index";

fn day(n: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

fn score(n: i64, delta: f64) -> RiskScore {
    let hash = format!("{:064x}", n);
    RiskScore {
        schema_version: SCHEMA_VERSION,
        id: RiskScore::score_id(ID, &day(n), &hash),
        indicator_id: ID.to_string(),
        timestamp: day(n),
        snapshot_hash: hash,
        snapshot_revision: 1,
        baseline_avg: Some(100.0),
        baseline_points: 30,
        observed_value: 100.0 + delta,
        delta_pct: Some(delta),
        severity: if delta >= 15.0 { Severity::Critical } else { Severity::Normal },
        risk_score: 0,
        insufficient_baseline: false,
        zero_baseline: false,
        computed_at: Utc::now(),
    }
}

async fn create_test_state() -> Arc<AppState> {
    let registry = IndicatorRegistry::from_indicators([
        Indicator::new(ID, "Freight cost index", "index").with_window_size(5),
        Indicator::new("port_congestion_la", "Port congestion LA", "ships"),
    ])
    .await
    .unwrap();

    let snapshots = Arc::new(PartitionedSnapshotStore::in_memory());
    for n in 0..10 {
        snapshots
            .put(Snapshot::new(ID, day(n), 100.0 + n as f64, "test"))
            .await
            .unwrap();
    }

    let scores = Arc::new(MemoryScoreStore::new());
    scores.upsert(score(8, 2.0)).await.unwrap();
    scores.upsert(score(9, 16.0)).await.unwrap();

    Arc::new(AppState {
        registry: Arc::new(registry),
        query: QueryService::new(snapshots, scores),
        alerts: Arc::new(MemoryAlertStore::new()),
    })
}

async fn get(uri: &str) -> (StatusCode, Value) {
    let app = pulse_server::api::create_router(create_test_state().await);
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = pulse_server::api::create_router(create_test_state().await);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_list_indicators() {
    let (status, json) = get("/api/v1/indicators").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["indicators"].as_array().unwrap().len(), 2);
    assert_eq!(json["scored"], serde_json::json!([ID]));
}

#[tokio::test]
async fn test_recent_scores_newest_first() {
    let (status, json) = get("/api/v1/indicators/freight_cost_index/scores?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    let scores = json["scores"].as_array().unwrap();
    assert_eq!(scores.len(), 2);
    assert_eq!(scores[0]["delta_pct"], 16.0);
    assert_eq!(scores[0]["severity"], "critical");
}

#[tokio::test]
async fn test_latest_score() {
    let (status, json) = get("/api/v1/indicators/freight_cost_index/scores/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["timestamp"], "2024-01-10T00:00:00Z");
    assert_eq!(json["schema_version"], 1);
}

#[tokio::test]
async fn test_missing_scores_answer_no_score_available() {
    for uri in [
        "/api/v1/indicators/port_congestion_la/scores/latest",
        "/api/v1/indicators/port_congestion_la/scores",
        "/api/v1/indicators/unknown/scores/latest",
    ] {
        let (status, json) = get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(json["error"], "no score available");
    }
}

#[tokio::test]
async fn test_score_range() {
    let (status, json) = get(
        "/api/v1/indicators/freight_cost_index/scores/range?start=2024-01-09T00:00:00Z&end=2024-01-10T00:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let scores = json["scores"].as_array().unwrap();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0]["timestamp"], "2024-01-09T00:00:00Z");

    let (status, _) = get(
        "/api/v1/indicators/freight_cost_index/scores/range?start=2024-01-10T00:00:00Z&end=2024-01-09T00:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_snapshot_window_defaults_to_indicator_window() {
    let (status, json) =
        get("/api/v1/indicators/freight_cost_index/snapshots?upto=2024-01-10T00:00:00Z").await;
    assert_eq!(status, StatusCode::OK);
    let values: Vec<f64> = json["snapshots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["value"].as_f64().unwrap())
        .collect();
    // Five points strictly before day 9, oldest first.
    assert_eq!(values, vec![104.0, 105.0, 106.0, 107.0, 108.0]);

    let (status, _) = get("/api/v1/indicators/freight_cost_index/snapshots?count=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_alert_listing_empty() {
    let (status, json) = get("/api/v1/alerts").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["alerts"].as_array().unwrap().is_empty());
}
