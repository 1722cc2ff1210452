//! Observability endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use super::internal_error;
use crate::server::AppState;

/// GET /api/health
pub async fn get_health() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

/// GET /api/status/crawler: monitor snapshot.
pub async fn get_crawler_status(State(state): State<AppState>) -> Response {
    Json(state.monitor.snapshot()).into_response()
}

/// GET /api/status/worker: resources currently in each pipeline state.
pub async fn get_worker_status(State(state): State<AppState>) -> Response {
    let counts = match state.db.catalog().status_counts() {
        Ok(counts) => counts,
        Err(e) => return internal_error(e),
    };
    let mut by_status = serde_json::Map::new();
    for (status, count) in counts {
        by_status.insert(
            status.unwrap_or_else(|| "idle".to_string()),
            serde_json::Value::from(count),
        );
    }
    Json(serde_json::json!({ "resources": by_status })).into_response()
}

/// GET /api/stats: catalog size plus daily check counts by status.
pub async fn get_stats(State(state): State<AppState>) -> Response {
    let catalog_size = match state.db.catalog().count() {
        Ok(count) => count,
        Err(e) => return internal_error(e),
    };
    let today = Utc::now().date_naive();
    let by_status = match state.db.checks().get_group_by_for_date("status", today) {
        Ok(buckets) => buckets,
        Err(e) => return internal_error(e),
    };
    Json(serde_json::json!({
        "catalog_size": catalog_size,
        "checks_today": by_status,
    }))
    .into_response()
}
