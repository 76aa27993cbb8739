//! Application state for the ticketing HTTP server.

use crate::purchase::PurchaseService;
use crate::reconciler::SettlementReconciler;
use crate::responder::ProtocolResponder;
use crate::store::TicketStore;
use std::sync::Arc;
use uma_tickets_core::environment::Clock;

/// Application state shared across all HTTP handlers.
///
/// Every field is cheap to clone; axum clones the state per request.
#[derive(Clone)]
pub struct AppState {
    /// Ticket and payment storage
    pub store: Arc<dyn TicketStore>,
    /// Purchase, status and retry
    pub purchases: PurchaseService,
    /// Discovery documents and pull callbacks
    pub responder: ProtocolResponder,
    /// Settlement webhooks
    pub reconciler: SettlementReconciler,
    /// Clock
    pub clock: Arc<dyn Clock>,
}
