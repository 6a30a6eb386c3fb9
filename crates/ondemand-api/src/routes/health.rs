//! Health check endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once tasks can be launched: networking must be configured.
async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.config.require_subnets()?;
    Ok(Json(json!({
        "status": "ready",
        "queue": state.config.queue,
    })))
}
