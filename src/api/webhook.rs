//! Provider webhook receiver.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use super::routes::AppState;
use crate::reconcile::{ReconcileError, Signal, WebhookPayload};

pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

fn verify_secret(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|provided| constant_time_eq(provided, expected))
        .unwrap_or(false)
}

/// `POST /api/webhooks/browser-use`
///
/// Acknowledges as soon as the payload is validated; the signal itself is
/// reconciled in the background so a slow finalization never holds the
/// provider's request open.
pub async fn browser_use_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if !verify_secret(state.webhook_secret.as_deref(), &headers) {
        tracing::warn!("Rejected webhook with missing or wrong secret");
        return (StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Malformed webhook body: {}", e);
            return (StatusCode::BAD_REQUEST, "Malformed payload");
        }
    };

    if payload.is_test() {
        tracing::info!("Received test webhook event");
        return (StatusCode::OK, "OK");
    }

    let signal = match Signal::from_webhook(&payload) {
        Ok(Some(signal)) => signal,
        Ok(None) => {
            tracing::debug!(event = %payload.event_type, "Ignoring webhook event");
            return (StatusCode::OK, "OK");
        }
        Err(ReconcileError::MissingTaskId) => return (StatusCode::BAD_REQUEST, "Missing task_id"),
        Err(e) => {
            tracing::error!("Webhook processing error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
    };

    tracing::info!(
        task_id = %signal.task_id,
        status = payload.payload.as_ref().and_then(|p| p.status.as_deref()).unwrap_or(""),
        "Webhook received"
    );

    let reconciler = state.service.reconciler().clone();
    tokio::spawn(async move {
        let task_id = signal.task_id.clone();
        if let Err(e) = reconciler.apply(signal).await {
            tracing::warn!(task_id = %task_id, "Failed to reconcile webhook: {}", e);
        }
    });

    (StatusCode::OK, "OK")
}
