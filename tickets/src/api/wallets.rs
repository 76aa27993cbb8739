//! Wallet credential endpoint.
//!
//! - PUT /api/users/:user_id/wallet - Store the buyer's wallet connection

use super::error::AppError;
use crate::server::state::AppState;
use crate::types::{UserId, WalletCredential};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uma_tickets_core::environment::Clock;
use uuid::Uuid;

/// Wallet connection received after OAuth completion.
#[derive(Deserialize)]
pub struct WalletConnectionRequest {
    /// Wallet-connect URI
    pub connection_uri: String,
    /// When the connection stops being valid
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Store or replace the buyer's wallet connection.
pub async fn put_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<WalletConnectionRequest>,
) -> Result<StatusCode, AppError> {
    if request.connection_uri.trim().is_empty() {
        return Err(AppError::validation("connection_uri must not be empty"));
    }

    let now = state.clock.now();
    if request.expires_at.is_some_and(|expires| expires <= now) {
        return Err(AppError::validation("expires_at is in the past"));
    }

    let user_id = UserId::from_uuid(user_id);
    state
        .store
        .upsert_wallet_credential(&WalletCredential {
            user_id,
            connection_uri: request.connection_uri,
            expires_at: request.expires_at,
            updated_at: now,
        })
        .await?;

    tracing::info!(%user_id, "Wallet connection stored");
    Ok(StatusCode::NO_CONTENT)
}
