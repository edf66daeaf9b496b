//! Upkube library
//!
//! Restart, re-image, list and diagnose Kubernetes Deployments over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod k8s;

use axum::http::{header, HeaderValue, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::AppState;

/// Create the application router with the given state
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        // Namespaces
        .route("/api/namespaces", get(api::namespaces::list))
        // Deployments
        .route(
            "/api/namespaces/:namespace/deployments",
            get(api::deployments::list),
        )
        .route(
            "/api/namespaces/:namespace/deployments/:name/restart",
            post(api::deployments::restart),
        )
        .route(
            "/api/namespaces/:namespace/deployments/:name/image",
            post(api::deployments::update_image),
        )
        .route(
            "/api/namespaces/:namespace/deployments/:name/diagnosis",
            get(api::deployments::diagnose),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// CORS layer allowing the configured comma-separated origins
///
/// `*` allows any origin, in which case credentials are not allowed.
fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let entries: Vec<&str> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if entries.contains(&"*") {
        return cors.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = entries.iter().filter_map(|s| s.parse().ok()).collect();
    cors.allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
