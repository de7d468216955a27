//! Axum router configuration

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{adjust_bpm, health_check, list_tracks, mix_all, version_check, FAILED_SPEEDS_HEADER};

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes();
    let cors_enabled = state.config.cors_enabled;

    let router = Router::new()
        .route("/", get(health_check))
        .route("/version", get(version_check))
        .route("/tracks", get(list_tracks))
        .route("/mix-all", post(mix_all))
        .route("/adjust-bpm", post(adjust_bpm))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    let router = if cors_enabled {
        // Browser clients read the failure header from the zip response
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
            .expose_headers([
                header::CONTENT_DISPOSITION,
                header::HeaderName::from_static(FAILED_SPEEDS_HEADER),
            ])
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}
