//! Business metrics for ticket sales and payment reconciliation.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `uma_tickets_purchases_total{kind}` - Purchases by kind (free, priced, rejected)
//! - `uma_tickets_payments_total{status}` - Payment status changes (paid, failed, expired, retried)
//! - `uma_tickets_dispatch_total{path,outcome}` - Dispatch attempts per path (wallet, push)
//! - `uma_tickets_webhooks_total{outcome}` - Settlement notifications by outcome

use crate::types::PaymentStatus;
use metrics::describe_counter;

/// Initialize and register all metric descriptions.
///
/// Call once at startup, after the recorder is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "uma_tickets_purchases_total",
        "Total purchases by kind (free, priced, rejected)"
    );
    describe_counter!(
        "uma_tickets_payments_total",
        "Total payment status transitions by resulting status"
    );
    describe_counter!(
        "uma_tickets_dispatch_total",
        "Total payment dispatch attempts by path (wallet, push) and outcome"
    );
    describe_counter!(
        "uma_tickets_webhooks_total",
        "Total settlement notifications by outcome"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Purchase kind label
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurchaseKind {
    /// Zero-priced event
    Free,
    /// Invoice issued
    Priced,
    /// Rejected before anything was stored
    Rejected,
}

impl PurchaseKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Priced => "priced",
            Self::Rejected => "rejected",
        }
    }
}

/// Record a purchase attempt.
pub fn record_purchase(kind: PurchaseKind) {
    metrics::counter!("uma_tickets_purchases_total", "kind" => kind.label()).increment(1);
}

/// Record a persisted payment status change.
pub fn record_payment_status(status: PaymentStatus) {
    let label = match status {
        PaymentStatus::Pending => "retried",
        other => other.as_str(),
    };
    metrics::counter!("uma_tickets_payments_total", "status" => label).increment(1);
}

/// Record the outcome of a wallet or push attempt.
///
/// # Arguments
///
/// * `path` - `wallet` or `push`
/// * `outcome` - `succeeded` or `failed`
pub fn record_dispatch(path: &'static str, outcome: &'static str) {
    metrics::counter!("uma_tickets_dispatch_total", "path" => path, "outcome" => outcome)
        .increment(1);
    tracing::debug!(path, outcome, "Recorded dispatch metric");
}

/// Record a settlement notification outcome (`settled`, `duplicate`,
/// `unmatched`, `ignored`, `rejected`, `error`).
pub fn record_webhook(outcome: &'static str) {
    metrics::counter!("uma_tickets_webhooks_total", "outcome" => outcome).increment(1);
}
