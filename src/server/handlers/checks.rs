//! Check journal endpoints.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{internal_error, json_error, require_auth};
use crate::repository::CheckTarget;
use crate::server::AppState;

/// Target selector shared by the latest/all endpoints: exactly one of `url`
/// or `resource_id`.
#[derive(Debug, Deserialize)]
pub struct TargetParams {
    pub url: Option<String>,
    pub resource_id: Option<Uuid>,
}

impl TargetParams {
    fn target(&self) -> Result<CheckTarget<'_>, Response> {
        match (&self.url, &self.resource_id) {
            (Some(url), None) => Ok(CheckTarget::Url(url)),
            (None, Some(id)) => Ok(CheckTarget::ResourceId(id)),
            _ => Err(json_error(
                StatusCode::BAD_REQUEST,
                "provide exactly one of 'url' or 'resource_id'",
            )),
        }
    }
}

/// GET /api/checks/latest
pub async fn get_latest_check(
    State(state): State<AppState>,
    Query(params): Query<TargetParams>,
) -> Response {
    let target = match params.target() {
        Ok(target) => target,
        Err(response) => return response,
    };
    match state.db.checks().get_latest(&target) {
        Ok(Some(check)) if check.deleted => StatusCode::GONE.into_response(),
        Ok(Some(check)) => Json(check).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/checks/all
pub async fn get_all_checks(
    State(state): State<AppState>,
    Query(params): Query<TargetParams>,
) -> Response {
    let target = match params.target() {
        Ok(target) => target,
        Err(response) => return response,
    };
    match state.db.checks().get_all(&target) {
        Ok(checks) if checks.is_empty() => StatusCode::NOT_FOUND.into_response(),
        Ok(checks) => Json(checks).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AggregateParams {
    pub created_at: Option<String>,
    pub group_by: Option<String>,
}

/// GET /api/checks/aggregate
pub async fn get_checks_aggregate(
    State(state): State<AppState>,
    Query(params): Query<AggregateParams>,
) -> Response {
    let Some(created_at) = params.created_at.as_deref() else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing mandatory 'created_at' param; use created_at=today for today's checks",
        );
    };
    let Some(group_by) = params.group_by.as_deref() else {
        return json_error(StatusCode::BAD_REQUEST, "missing mandatory 'group_by' param");
    };
    let date = if created_at == "today" {
        Utc::now().date_naive()
    } else {
        match created_at.parse::<NaiveDate>() {
            Ok(date) => date,
            Err(_) => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "'created_at' must be YYYY-MM-DD or 'today'",
                )
            }
        }
    };

    match state.db.checks().get_group_by_for_date(group_by, date) {
        Ok(buckets) if buckets.is_empty() => StatusCode::NOT_FOUND.into_response(),
        Ok(buckets) => Json(buckets).into_response(),
        Err(crate::repository::RepositoryError::NotFound(message)) => {
            json_error(StatusCode::BAD_REQUEST, message)
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckPayload {
    pub resource_id: Uuid,
}

/// POST /api/checks: force an immediate check of a resource. The URL is
/// read from the catalog record.
pub async fn create_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<CreateCheckPayload>>,
) -> Response {
    if let Err(response) = require_auth(&state, &headers) {
        return response;
    }
    let Some(Json(payload)) = payload else {
        return json_error(StatusCode::BAD_REQUEST, "missing key: 'resource_id'");
    };

    let resource = match state.db.catalog().get(&payload.resource_id) {
        Ok(Some(resource)) => resource,
        Ok(None) => {
            return json_error(
                StatusCode::NOT_FOUND,
                format!("couldn't find URL for resource {}", payload.resource_id),
            )
        }
        Err(e) => return internal_error(e),
    };

    state
        .monitor
        .set_status(format!("Crawling url \"{}\"...", resource.url));
    match state.crawler.check_resource(&resource, false).await {
        Ok(check) => Json(check).into_response(),
        Err(e) => json_error(StatusCode::BAD_REQUEST, format!("check not created: {e}")),
    }
}
