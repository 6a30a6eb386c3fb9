//! Template expansion endpoint.

use axum::Json;
use axum::extract::State;
use ondemand_transform::{ExpansionRequest, ExpansionResponse};
use tracing::info;

use crate::AppState;

/// Expand placeholder resources. Failures are reported in the body with status 200.
pub async fn transform(
    State(state): State<AppState>,
    Json(request): Json<ExpansionRequest>,
) -> Json<ExpansionResponse> {
    info!(
        request_id = %request.request_id,
        transform_id = %request.transform_id,
        "Received template expansion request"
    );
    Json(state.expander.expand(&request))
}
