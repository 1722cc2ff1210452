//! Router configuration for the admin API.

use axum::routing::{get, post, MethodRouter};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Register a route under both its bare path and its trailing-slash twin.
fn route_both(
    router: Router<AppState>,
    path: &str,
    method_router: MethodRouter<AppState>,
) -> Router<AppState> {
    router
        .route(path, method_router.clone())
        .route(&format!("{path}/"), method_router)
}

/// Create the admin API router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new();
    // Checks
    router = route_both(router, "/api/checks/latest", get(handlers::get_latest_check));
    router = route_both(router, "/api/checks/all", get(handlers::get_all_checks));
    router = route_both(
        router,
        "/api/checks/aggregate",
        get(handlers::get_checks_aggregate),
    );
    router = route_both(router, "/api/checks", post(handlers::create_check));
    // Resources
    router = route_both(
        router,
        "/api/resources/:resource_id",
        get(handlers::get_resource)
            .put(handlers::update_resource)
            .delete(handlers::delete_resource),
    );
    router = route_both(
        router,
        "/api/resources/:resource_id/status",
        get(handlers::get_resource_status),
    );
    router = route_both(router, "/api/resources", post(handlers::create_resource));
    // Statuses
    router = route_both(router, "/api/status/crawler", get(handlers::get_crawler_status));
    router = route_both(router, "/api/status/worker", get(handlers::get_worker_status));
    router = route_both(router, "/api/stats", get(handlers::get_stats));
    router = route_both(router, "/api/health", get(handlers::get_health));

    router.layer(CorsLayer::permissive()).with_state(state)
}
