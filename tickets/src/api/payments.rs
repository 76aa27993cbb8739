//! Admin payment endpoints.
//!
//! - POST /api/payments/:id/retry - Retry a failed or expired payment

use super::error::AppError;
use crate::purchase::PurchaseReceipt;
use crate::server::state::AppState;
use crate::types::PaymentId;
use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

/// Retry a failed or expired payment with a fresh invoice.
///
/// Answers `409` unless the payment is failed or expired.
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PurchaseReceipt>, AppError> {
    let receipt = state.purchases.retry(PaymentId::from_uuid(payment_id)).await?;
    Ok(Json(receipt))
}
