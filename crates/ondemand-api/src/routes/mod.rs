//! API routes.

pub mod health;
pub mod jobs;
pub mod transform;
pub mod webhooks;

use crate::AppState;
use axum::Router;
use axum::routing::post;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/webhooks", webhooks::router())
        .nest("/jobs", jobs::router())
        .route("/transform", post(transform::transform))
        .merge(health::router())
        .with_state(state)
}
