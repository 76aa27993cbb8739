//! UMA / LNURL endpoints.
//!
//! - GET /.well-known/lnurlp/:username - Payable parameters
//! - GET /.well-known/uma-configuration - Supported protocol versions
//! - POST /api/uma/payreq/:ticket_id - Counterparty pull for a ticket's invoice
//! - GET /api/uma/payreq/:ticket_id - Same, as a bare LNURL callback
//! - GET /api/uma/callback?amount= - Deprecated amount-matched lookup
//!
//! Pay-request failures answer `200` with `{"status":"ERROR","reason":...}`.

use super::error::AppError;
use crate::server::state::AppState;
use crate::types::TicketId;
use crate::uma::{
    AmountQuery, PayRequestBody, PayRequestResponse, PayableParameters, ProtocolError,
    UmaConfiguration,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
};
use uuid::Uuid;

/// LNURL pay parameters for `username`.
pub async fn lnurlp(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<PayableParameters>, AppError> {
    state
        .responder
        .payable_parameters(&username)
        .map(Json)
        .ok_or_else(|| AppError::not_found("User", username))
}

/// Provider configuration document.
pub async fn uma_configuration(State(state): State<AppState>) -> Json<UmaConfiguration> {
    Json(state.responder.uma_configuration())
}

/// Counterparty pull request with a JSON body.
///
/// An empty body is treated as a bare amount query.
pub async fn pay_request(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<PayRequestResponse>, ProtocolError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        PayRequestBody::Amount(AmountQuery::default())
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            tracing::debug!(error = %e, "Unparseable pay request");
            ProtocolError::new("malformed pay request")
        })?
    };

    state
        .responder
        .pay_request(TicketId::from_uuid(ticket_id), &request)
        .await
        .map(Json)
}

/// Counterparty pull request as an LNURL `GET` callback.
pub async fn pay_request_query(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Query(query): Query<AmountQuery>,
) -> Result<Json<PayRequestResponse>, ProtocolError> {
    state
        .responder
        .pay_request(TicketId::from_uuid(ticket_id), &PayRequestBody::Amount(query))
        .await
        .map(Json)
}

/// Deprecated: invoice of the oldest pending payment for exactly `amount`.
pub async fn amount_callback(
    State(state): State<AppState>,
    Query(query): Query<AmountQuery>,
) -> Result<Json<PayRequestResponse>, ProtocolError> {
    state.responder.pay_by_amount(query.amount).await.map(Json)
}
