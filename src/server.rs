//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{get, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/progress", get(handlers::sync_list_progress))
        .route("/progress/{work_id}", get(handlers::sync_get_progress))
        .route("/progress/{work_id}", put(handlers::sync_update_progress))
        .route(
            "/progress/{work_id}/completed",
            put(handlers::sync_set_completed),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/sync", sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
