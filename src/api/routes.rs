//! Route table of the command API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::middleware::auth::AuthLayer;
use crate::AppState;

/// Commands wait for translation only, never for generation
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = AuthLayer::from_config(&state.settings.auth);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/illust", post(handlers::illust))
        .route("/v1/img2img", post(handlers::img2img))
        .route("/v1/hokusai", post(handlers::hokusai))
        .route("/v1/poem", post(handlers::poem))
        .route("/v1/queue", get(handlers::queue_status))
        .route("/v1/queue/report", post(handlers::queue_report))
        .layer(auth)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
