use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // State queries
        .route("/api/state", get(handlers::get_state))
        .route("/api/devices", get(handlers::list_devices))
        // Configuration
        .route("/api/setup", post(handlers::setup_project))
        .route("/api/settings", post(handlers::update_settings))
        .route("/api/new-register", post(handlers::new_register))
        // Recording control
        .route("/api/record", post(handlers::record))
        .route("/api/record-single", post(handlers::record_single))
        .route("/api/stop", post(handlers::stop))
        .route("/api/pause", post(handlers::pause))
        .route("/api/redo", post(handlers::redo))
        // Navigation
        .route("/api/next", post(handlers::next_note))
        .route("/api/prev", post(handlers::prev_note))
        .route("/api/set-note", post(handlers::set_note))
        // Service
        .route("/api/remote-url", get(handlers::remote_url))
        .route("/api/shutdown", post(handlers::shutdown))
        // Remote controls run in browsers on other devices
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
