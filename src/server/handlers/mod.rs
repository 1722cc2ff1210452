//! Admin API endpoint handlers.

mod checks;
mod resources;
mod status;

pub use checks::{create_check, get_all_checks, get_checks_aggregate, get_latest_check};
pub use resources::{
    create_resource, delete_resource, get_resource, get_resource_status, update_resource,
};
pub use status::{get_crawler_status, get_health, get_stats, get_worker_status};

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::AppState;

/// JSON error body with the given status code.
pub(crate) fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Bearer-token gate for mutating routes. Open when no key is configured.
pub(crate) fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.settings.api_key.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(json_error(
            StatusCode::UNAUTHORIZED,
            "missing or invalid bearer token",
        ))
    }
}

/// Map a repository failure to a 500 with its message logged.
pub(crate) fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "handler failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}
