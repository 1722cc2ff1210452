//! Catalog resource endpoints.

use axum::extract::{Host, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{internal_error, json_error, require_auth};
use crate::models::ResourceStatus;
use crate::server::AppState;

/// Canonical payload for resource create/update events.
#[derive(Debug, Deserialize, Serialize)]
pub struct ResourcePayload {
    pub dataset_id: String,
    pub resource_id: Uuid,
    pub document: ResourceDocument,
}

/// The document nested in a resource event. Only the URL matters to the
/// crawler; the harvester timestamp feeds change detection when present.
#[derive(Debug, Deserialize, Serialize)]
pub struct ResourceDocument {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_modified_at: Option<DateTime<Utc>>,
}

fn parse_resource_id(raw: &str) -> Result<Uuid, Response> {
    raw.parse().map_err(|e| {
        json_error(
            StatusCode::BAD_REQUEST,
            format!("invalid resource_id: {e}"),
        )
    })
}

/// GET /api/resources/{id}
pub async fn get_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
) -> Response {
    let resource_id = match parse_resource_id(&resource_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.db.catalog().get(&resource_id) {
        Ok(Some(resource)) => Json(resource).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/resources/{id}/status
pub async fn get_resource_status(
    State(state): State<AppState>,
    host: Option<Host>,
    Path(resource_id): Path<String>,
) -> Response {
    let resource_id = match parse_resource_id(&resource_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let resource = match state.db.catalog().get(&resource_id) {
        Ok(Some(resource)) => resource,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => return internal_error(e),
    };

    let latest_check_path = format!("/api/checks/latest?resource_id={resource_id}");
    let latest_check_url = match host {
        Some(Host(host)) => format!("http://{host}{latest_check_path}"),
        None => latest_check_path,
    };
    Json(serde_json::json!({
        "resource_id": resource_id,
        "status": resource.status,
        "status_verbose": ResourceStatus::verbose(resource.status),
        "latest_check_url": latest_check_url,
    }))
    .into_response()
}

/// POST /api/resources: create, marked priority for the next cycle.
pub async fn create_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<ResourcePayload>>,
) -> Response {
    if let Err(response) = require_auth(&state, &headers) {
        return response;
    }
    let Some(Json(payload)) = payload else {
        return json_error(StatusCode::BAD_REQUEST, "invalid resource payload");
    };

    match state.db.catalog().upsert(
        &payload.dataset_id,
        &payload.resource_id,
        &payload.document.url,
        payload.document.harvest_modified_at,
    ) {
        Ok(()) => (StatusCode::CREATED, Json(&payload.document)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// PUT /api/resources/{id}: upsert, marked priority for the next cycle.
pub async fn update_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(resource_id): Path<String>,
    payload: Option<Json<ResourcePayload>>,
) -> Response {
    if let Err(response) = require_auth(&state, &headers) {
        return response;
    }
    let path_id = match parse_resource_id(&resource_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Some(Json(payload)) = payload else {
        return json_error(StatusCode::BAD_REQUEST, "invalid resource payload");
    };
    if payload.resource_id != path_id {
        return json_error(
            StatusCode::BAD_REQUEST,
            "resource_id in path and payload differ",
        );
    }

    match state.db.catalog().upsert(
        &payload.dataset_id,
        &payload.resource_id,
        &payload.document.url,
        payload.document.harvest_modified_at,
    ) {
        Ok(()) => Json(&payload.document).into_response(),
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/resources/{id}: soft delete.
pub async fn delete_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(resource_id): Path<String>,
) -> Response {
    if let Err(response) = require_auth(&state, &headers) {
        return response;
    }
    let resource_id = match parse_resource_id(&resource_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.db.catalog().soft_delete(&resource_id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}
