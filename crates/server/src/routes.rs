//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, patch, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/whoami", get(handlers::whoami))
        // Listing and download
        .route("/v1/static", get(handlers::list_files))
        .route("/v1/static/{*path}", get(handlers::download_file))
        // Files
        .route(
            "/v1/file/upload",
            post(handlers::upload_files).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/v1/file/remove", delete(handlers::remove_file))
        .route("/v1/file/rename", post(handlers::rename_file))
        .route("/v1/file/move", post(handlers::move_file))
        // Directories
        .route("/v1/dir/create", post(handlers::create_directory))
        .route("/v1/dir/rename", post(handlers::rename_directory))
        .route("/v1/dir/move", post(handlers::move_directory))
        .route("/v1/dir/remove", delete(handlers::remove_directory))
        // Repository administration (admin only)
        .route("/v1/rep/create", post(handlers::create_repository))
        .route("/v1/rep/get", get(handlers::list_repositories))
        .route("/v1/rep/getfiles/{repo}", get(handlers::list_repository_paths))
        .route("/v1/rep/getperms/{repo}", get(handlers::list_grants))
        .route("/v1/rep/addperms/{repo}", post(handlers::add_grant))
        .route("/v1/rep/editperms/{repo}", patch(handlers::edit_grant))
        .route("/v1/rep/removeperms/{repo}", delete(handlers::remove_grant))
        .route(
            "/v1/rep/reconcile/{repo}",
            post(handlers::reconcile_repository),
        )
        // Roles and tokens (admin only)
        .route(
            "/v1/admin/roles",
            post(handlers::create_role).get(handlers::list_roles),
        )
        .route("/v1/admin/tokens", post(handlers::create_token))
        .route(
            "/v1/admin/tokens/{token_id}",
            delete(handlers::revoke_token),
        );

    let mut router = Router::new().merge(api_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.merge(Router::new().route("/metrics", get(metrics_handler)));
    }

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    // Order of execution: TraceLayer -> CORS -> Auth -> Handler
    let router = router.layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));
    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the configured origins; `None` when no origin is configured.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true),
    )
}
