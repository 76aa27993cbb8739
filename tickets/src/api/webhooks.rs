//! Settlement webhook.
//!
//! - POST /webhooks/payment - Signed processor notification
//!
//! Only a bad signature is answered with an error. Everything else, including
//! events we cannot match or apply, is acknowledged with `200`.

use super::error::AppError;
use crate::reconciler::{ReconcileError, SIGNATURE_HEADER};
use crate::server::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::Serialize;

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `ok`
    pub status: &'static str,
}

/// Receive a settlement notification.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.reconciler.on_notification(&body, signature).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "Webhook processed");
        },
        Err(ReconcileError::InvalidSignature) => {
            tracing::warn!("Webhook rejected: invalid signature");
            return Err(ReconcileError::InvalidSignature.into());
        },
        Err(error) => {
            tracing::warn!(%error, "Webhook dropped");
        },
    }

    Ok(Json(WebhookAck { status: "ok" }))
}
