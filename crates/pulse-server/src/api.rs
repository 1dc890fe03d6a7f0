use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use pulse_timeseries::ScoreQuery;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_LIMIT: usize = 30;
const DEFAULT_SNAPSHOT_COUNT: usize = 30;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub upto: Option<DateTime<Utc>>,
    pub count: Option<usize>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/indicators", get(list_indicators))
        .route("/api/v1/indicators/:id/scores", get(recent_scores))
        .route("/api/v1/indicators/:id/scores/latest", get(latest_score))
        .route("/api/v1/indicators/:id/scores/range", get(score_range))
        .route("/api/v1/indicators/:id/snapshots", get(snapshot_window))
        .route("/api/v1/alerts", get(recent_alerts))
        .with_state(state)
}

/// The dashboard only ever learns that nothing is available, never why.
fn not_available() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "no score available" })),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn list_indicators(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let indicators = state.registry.list().await;
    let scored = state.query.list_indicators().await;
    Json(json!({
        "indicators": indicators,
        "scored": scored,
    }))
}

async fn recent_scores(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Response {
    let scores = state
        .query
        .get_recent_scores(&id, q.limit.unwrap_or(DEFAULT_LIMIT))
        .await;
    if scores.is_empty() {
        debug!(indicator_id = %id, "No scores to serve");
        return not_available();
    }
    Json(json!({ "indicator_id": id, "scores": scores })).into_response()
}

async fn latest_score(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.query.get_latest_score(&id).await {
        Some(score) => Json(score).into_response(),
        None => not_available(),
    }
}

async fn score_range(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<RangeQuery>,
) -> Response {
    if q.start >= q.end {
        return bad_request("start must be before end");
    }
    let query = ScoreQuery::new(&id, q.start, q.end).with_limit(q.limit.unwrap_or(DEFAULT_LIMIT));
    let scores = state.query.get_scores_time_series(&query).await;
    if scores.is_empty() {
        return not_available();
    }
    Json(json!({ "indicator_id": id, "scores": scores })).into_response()
}

async fn snapshot_window(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<WindowQuery>,
) -> Response {
    let count = match q.count {
        Some(0) => return bad_request("count must be > 0"),
        Some(count) => count,
        None => match state.registry.get(&id).await {
            Some(indicator) => indicator.window_size,
            None => DEFAULT_SNAPSHOT_COUNT,
        },
    };
    let upto = q.upto.unwrap_or_else(Utc::now);

    let window = state.query.get_snapshot_window(&id, upto, count).await;
    if window.is_empty() {
        return not_available();
    }
    Json(json!({ "indicator_id": id, "upto": upto, "snapshots": window })).into_response()
}

async fn recent_alerts(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> Response {
    match state.alerts.list_recent(q.limit.unwrap_or(DEFAULT_LIMIT)).await {
        Ok(events) => Json(json!({ "alerts": events })).into_response(),
        Err(e) => {
            warn!(error = %e, "Alert listing failed");
            Json(json!({ "alerts": [] })).into_response()
        }
    }
}
