//! Router configuration for the ticketing system.

use super::health::health_check;
use super::state::AppState;
use crate::api::{payments, tickets, uma, wallets, webhooks};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the complete Axum router.
///
/// - `/health`
/// - `/.well-known/...` discovery documents
/// - `/api/...` purchase, status, retry, wallet and pull callbacks
/// - `/webhooks/payment` settlement notifications
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/events/:id/purchase", post(tickets::purchase_ticket))
        .route("/tickets/:id", get(tickets::get_ticket))
        .route("/payments/:id/retry", post(payments::retry_payment))
        .route("/users/:user_id/wallet", put(wallets::put_wallet))
        .route(
            "/uma/payreq/:ticket_id",
            post(uma::pay_request).get(uma::pay_request_query),
        )
        .route("/uma/callback", get(uma::amount_callback));

    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/lnurlp/:username", get(uma::lnurlp))
        .route("/.well-known/uma-configuration", get(uma::uma_configuration))
        .route("/webhooks/payment", post(webhooks::payment_webhook))
        .nest("/api", api_routes)
        .with_state(state)
}
