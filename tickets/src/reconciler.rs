//! Settlement reconciliation.
//!
//! The processor posts a signed event when it believes a payment finished.
//! Reconciliation verifies the signature, resolves the referenced entity to
//! the encoded invoice, finds the payment issued for it and applies the paid
//! transition. Delivery is at-least-once, so every step after verification is
//! idempotent.

use crate::lifecycle::LifecycleAction;
use crate::lightning::{LightningProcessor, ProcessorError, SettlementEntity};
use crate::metrics;
use crate::router::LifecycleRunner;
use crate::store::{StoreError, TicketStore};
use crate::types::{Payment, PaymentStatus, TicketId};
use crate::uma::{SettlementNotice, SettlementNotifier};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use uma_tickets_core::environment::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body
pub const SIGNATURE_HEADER: &str = "x-lightning-signature";

/// The only event type that triggers reconciliation
pub const PAYMENT_FINISHED: &str = "PAYMENT_FINISHED";

/// Processor webhook event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookEvent {
    /// Event type, e.g. `PAYMENT_FINISHED`
    pub event_type: String,
    /// Processor entity the event refers to
    pub entity_id: String,
    /// Processor event ID
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Reconciliation errors. Only [`ReconcileError::InvalidSignature`] is
/// surfaced to the sender; the rest are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// Signature missing or wrong
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Body is not a webhook event
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// Entity or invoice could not be fetched
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Entity carries no encoded payment request
    #[error("settlement entity {0} has no payment request")]
    MissingPaymentRequest(String),

    /// Lookup or transition failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a notification did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Payment and ticket moved to paid
    Settled {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Already paid; nothing changed
    AlreadySettled {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Payment is failed or expired and cannot become paid
    Rejected {
        /// Ticket
        ticket_id: TicketId,
        /// Stored status
        status: PaymentStatus,
    },
    /// No payment was issued for this invoice
    Unmatched {
        /// Encoded invoice
        invoice: String,
    },
    /// Event type other than [`PAYMENT_FINISHED`]
    Ignored {
        /// Event type
        event_type: String,
    },
}

impl ReconcileOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Settled { .. } => "settled",
            Self::AlreadySettled { .. } => "duplicate",
            Self::Rejected { .. } => "rejected_state",
            Self::Unmatched { .. } => "unmatched",
            Self::Ignored { .. } => "ignored",
        }
    }
}

/// Turns processor notifications into paid transitions
#[derive(Clone)]
pub struct SettlementReconciler {
    secret: Arc<[u8]>,
    processor: Arc<dyn LightningProcessor>,
    store: Arc<dyn TicketStore>,
    runner: LifecycleRunner,
    notifier: Arc<dyn SettlementNotifier>,
    clock: Arc<dyn Clock>,
    vasp_domain: String,
}

impl SettlementReconciler {
    /// Create a reconciler
    #[must_use]
    pub fn new(
        secret: impl AsRef<[u8]>,
        processor: Arc<dyn LightningProcessor>,
        store: Arc<dyn TicketStore>,
        runner: LifecycleRunner,
        notifier: Arc<dyn SettlementNotifier>,
        vasp_domain: impl Into<String>,
    ) -> Self {
        let clock = Arc::clone(&runner.environment().clock);
        Self {
            secret: Arc::from(secret.as_ref()),
            processor,
            store,
            runner,
            notifier,
            clock,
            vasp_domain: vasp_domain.into(),
        }
    }

    /// Check `signature` (hex HMAC-SHA256 of `body`).
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidSignature`] on any mismatch.
    pub fn verify_signature(&self, body: &[u8], signature: &str) -> Result<(), ReconcileError> {
        let expected = hex::decode(signature.trim()).map_err(|_| ReconcileError::InvalidSignature)?;
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| ReconcileError::InvalidSignature)?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| ReconcileError::InvalidSignature)
    }

    /// Handle one notification.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidSignature`] before any state is read
    /// when the signature does not verify; other errors mean the event was
    /// understood but could not be applied.
    pub async fn on_notification(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.reconcile(body, signature).await;
        match &result {
            Ok(outcome) => metrics::record_webhook(outcome.label()),
            Err(ReconcileError::InvalidSignature) => metrics::record_webhook("rejected"),
            Err(_) => metrics::record_webhook("error"),
        }
        result
    }

    async fn reconcile(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.verify_signature(body, signature.ok_or(ReconcileError::InvalidSignature)?)?;

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| ReconcileError::MalformedPayload(e.to_string()))?;
        if event.event_type != PAYMENT_FINISHED {
            tracing::debug!(event_type = %event.event_type, "Ignoring webhook event");
            return Ok(ReconcileOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let entity = self.processor.fetch_settlement(&event.entity_id).await?;
        let invoice = self.resolve_invoice(entity).await?;

        let Some(payment) = self.store.payment_by_invoice(&invoice).await? else {
            tracing::warn!(
                entity_id = %event.entity_id,
                %invoice,
                "Settlement for unknown invoice dropped"
            );
            return Ok(ReconcileOutcome::Unmatched { invoice });
        };

        self.settle(payment).await
    }

    /// Encoded invoice a settlement entity refers to
    async fn resolve_invoice(&self, entity: SettlementEntity) -> Result<String, ReconcileError> {
        match entity {
            SettlementEntity::IncomingPayment { id, invoice_id } => {
                let invoice = self.processor.fetch_invoice(&invoice_id).await?;
                if invoice.encoded_payment_request.is_empty() {
                    return Err(ReconcileError::MissingPaymentRequest(id));
                }
                Ok(invoice.encoded_payment_request)
            },
            SettlementEntity::OutgoingPayment {
                id,
                payment_request_data,
            } => payment_request_data
                .as_ref()
                .and_then(|data| data.encoded())
                .map(str::to_string)
                .ok_or(ReconcileError::MissingPaymentRequest(id)),
        }
    }

    async fn settle(&self, payment: Payment) -> Result<ReconcileOutcome, ReconcileError> {
        let ticket_id = payment.ticket_id;
        let outcome = self
            .runner
            .apply(
                ticket_id,
                LifecycleAction::SettlementMatched {
                    paid_at: self.clock.now(),
                },
            )
            .await?;

        if outcome.persisted {
            tracing::info!(%ticket_id, payment_id = %payment.id, "Payment settled");
            self.notify_counterparty(&payment, outcome.state.paid_at).await;
            return Ok(ReconcileOutcome::Settled { ticket_id });
        }

        match outcome.state.payment_status {
            PaymentStatus::Paid => {
                tracing::debug!(%ticket_id, "Duplicate settlement ignored");
                Ok(ReconcileOutcome::AlreadySettled { ticket_id })
            },
            status => {
                tracing::warn!(%ticket_id, %status, "Settlement for closed payment not applied");
                Ok(ReconcileOutcome::Rejected { ticket_id, status })
            },
        }
    }

    async fn notify_counterparty(&self, payment: &Payment, paid_at: Option<chrono::DateTime<chrono::Utc>>) {
        let Some(callback) = payment.counterparty_callback.as_deref() else {
            return;
        };
        let notice = SettlementNotice {
            vasp_domain: self.vasp_domain.clone(),
            invoice: payment.invoice.clone(),
            amount_msats: payment.amount.millisats(),
            settled_at: paid_at.unwrap_or_else(|| self.clock.now()),
        };
        if let Err(error) = self.notifier.notify(callback, &notice).await {
            tracing::warn!(ticket_id = %payment.ticket_id, %callback, %error, "Counterparty callback failed");
        }
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`, as the processor computes it
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    HmacSha256::new_from_slice(secret).map_or_else(
        |_| String::new(),
        |mut mac| {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        },
    )
}
