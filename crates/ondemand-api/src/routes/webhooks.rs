//! Webhook endpoint for the CI service.
//!
//! Requests are authenticated with the configured webhook token, sent either
//! verbatim in `X-Buildkite-Token` or as an HMAC-SHA256 signature over
//! `<timestamp>.<body>` in `X-Buildkite-Signature: timestamp=<t>,signature=<hex>`.
//! Without a configured token every request is accepted.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use ondemand_core::JobRequest;
use ondemand_scheduler::{ScheduleOutcome, schedule_job};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub const TOKEN_HEADER: &str = "X-Buildkite-Token";
pub const SIGNATURE_HEADER: &str = "X-Buildkite-Signature";
pub const EVENT_HEADER: &str = "X-Buildkite-Event";

pub const JOB_SCHEDULED: &str = "job.scheduled";

pub fn router() -> Router<AppState> {
    Router::new().route("/buildkite", post(buildkite_webhook))
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    job: Option<JobRequest>,
}

/// Handle CI service webhook events.
///
/// `job.scheduled` events are queued when they target this scheduler's queue
/// (201) and answered with the reason otherwise (400). Other events are
/// acknowledged and dropped.
async fn buildkite_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(secret) = state.config.webhook_token.as_deref() {
        if !verify_request(secret, &headers, &body) {
            warn!("Invalid webhook token or signature");
            return Err(ApiError::Unauthorized(
                "invalid webhook token or signature".to_string(),
            ));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let event = payload
        .event
        .or_else(|| header(&headers, EVENT_HEADER).map(str::to_string))
        .unwrap_or_default();
    info!(event = %event, "Received webhook");

    if event != JOB_SCHEDULED {
        return Ok((
            StatusCode::OK,
            Json(json!({ "message": format!("ignoring '{}' event", event) })),
        ));
    }

    let job = payload
        .job
        .ok_or_else(|| ApiError::BadRequest(format!("{} event without a job", JOB_SCHEDULED)))?;

    match schedule_job(state.queue.as_ref(), state.config.queue.as_deref(), job).await? {
        ScheduleOutcome::Scheduled(message_id) => Ok((
            StatusCode::CREATED,
            Json(json!({ "message": "scheduled run task", "messageId": message_id })),
        )),
        ScheduleOutcome::Ignored { reason } => {
            Ok((StatusCode::BAD_REQUEST, Json(json!({ "message": reason }))))
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// A token header, when present, decides on its own.
fn verify_request(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    if let Some(token) = header(headers, TOKEN_HEADER) {
        return verify_token(secret, token);
    }
    verify_signature(secret, body, header(headers, SIGNATURE_HEADER))
}

/// Compare a token against the secret in constant time. Both sides are
/// reduced to fixed-length MACs first so their lengths do not leak either.
pub fn verify_token(secret: &str, token: &str) -> bool {
    let digest = |value: &str| {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(value.as_bytes());
        Some(mac)
    };
    let (Some(expected), Some(given)) = (digest(secret), digest(token)) else {
        return false;
    };
    given.verify_slice(&expected.finalize().into_bytes()).is_ok()
}

/// Verify a `timestamp=<t>,signature=<hex>` header.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    let mut timestamp = None;
    let mut digest = None;
    for part in signature.split(',') {
        match part.trim().split_once('=') {
            Some(("timestamp", value)) => timestamp = Some(value),
            Some(("signature", value)) => digest = Some(value),
            _ => {}
        }
    }
    let (Some(timestamp), Some(digest)) = (timestamp, digest) else {
        return false;
    };

    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}
