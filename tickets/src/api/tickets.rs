//! Ticket purchase and status endpoints.
//!
//! - POST /api/events/:id/purchase - Buy a ticket
//! - GET /api/tickets/:id - Poll a ticket's payment status

use super::error::AppError;
use crate::purchase::{PurchaseReceipt, TicketSnapshot};
use crate::server::state::AppState;
use crate::types::{EventId, TicketId, UserId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

/// Request to buy a ticket.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    /// Buyer
    pub user_id: UserId,
    /// Buyer's UMA address; required for priced events
    #[serde(default)]
    pub buyer_address: Option<String>,
}

/// Buy a ticket for an event.
///
/// Priced events answer `201` with `payment_required: true` and the invoice.
/// Payment routing continues in the background; poll the ticket for the
/// outcome. Free events answer `201` with a `free` ticket.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/events/{id}/purchase \
///   -H 'content-type: application/json' \
///   -d '{"user_id":"...","buyer_address":"$alice@wallet.example"}'
/// ```
pub async fn purchase_ticket(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseReceipt>), AppError> {
    let receipt = state
        .purchases
        .purchase(
            EventId::from_uuid(event_id),
            request.user_id,
            request.buyer_address.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Current ticket and payment status. Clients poll this every ten seconds
/// or so while a payment is pending.
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<TicketSnapshot>, AppError> {
    let snapshot = state.purchases.status(TicketId::from_uuid(ticket_id)).await?;
    Ok(Json(snapshot))
}
