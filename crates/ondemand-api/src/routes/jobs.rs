//! Job queue batch endpoint.
//!
//! Accepts a queue batch of `{"Records": [{"body": "<JobMessage JSON>"}]}`
//! and answers `{"statusCode": 200}` once every job was launched. Any failure
//! fails the whole request so the sender redelivers the batch.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use ondemand_scheduler::{BatchResponse, JobMessage};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/batch", post(batch))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchRequest {
    pub records: Vec<BatchRecord>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRecord {
    pub body: String,
}

async fn batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let messages = request
        .records
        .iter()
        .map(|record| serde_json::from_str::<JobMessage>(&record.body))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::BadRequest(format!("invalid job message: {}", e)))?;

    info!(count = messages.len(), "Received job batch");
    Ok(Json(state.batch.handle(&messages).await?))
}
