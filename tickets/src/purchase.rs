//! Ticket purchase, status polling and admin retry.
//!
//! A purchase runs synchronously through validation, capacity, invoice
//! issuance and the pending ticket/payment insert. Routing the payment is
//! handed to [`PaymentRouter`] and never awaited here.

use crate::capacity::CapacityGuard;
use crate::issuer::{InvoiceIssuer, IssueError};
use crate::lifecycle::{DispatchContext, LifecycleAction, PaymentLifecycle};
use crate::metrics::{self, PurchaseKind};
use crate::router::PaymentRouter;
use crate::store::{NewPurchase, StoreError, TicketStore};
use crate::types::{
    Event, EventId, Invoice, Payment, PaymentId, PaymentStatus, Ticket, TicketCode, TicketId,
    UserId, WalletCredential,
};
use crate::uma::{AddressError, UmaAddress};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uma_tickets_core::environment::Clock;
use uma_tickets_core::reducer::Reducer;

/// Purchase and retry failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurchaseError {
    /// Buyer address does not match `$localpart@domain`
    #[error("invalid buyer address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Priced purchases need an address to route the payment to
    #[error("a buyer address is required for priced events")]
    MissingAddress,

    /// Event does not exist
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// Event is not on sale
    #[error("event {0} is not on sale")]
    EventInactive(EventId),

    /// No capacity left
    #[error("event {0} is sold out")]
    SoldOut(EventId),

    /// Ticket does not exist
    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),

    /// Payment does not exist
    #[error("payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// Retry is only valid for failed or expired payments
    #[error("payment {payment_id} is {status} and cannot be retried")]
    NotRetryable {
        /// Payment
        payment_id: PaymentId,
        /// Its current status
        status: PaymentStatus,
    },

    /// Invoice could not be issued
    #[error(transparent)]
    Issuer(#[from] IssueError),

    /// Storage failure
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PurchaseError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::SoldOut(id) => Self::SoldOut(id),
            StoreError::EventInactive(id) => Self::EventInactive(id),
            other => Self::Store(other),
        }
    }
}

/// What the buyer gets back from a purchase or retry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    /// The ticket
    pub ticket: Ticket,
    /// Its payment; absent for free events
    pub payment: Option<Payment>,
    /// The invoice to pay; absent for free events
    pub invoice: Option<Invoice>,
    /// Whether the buyer still has to pay
    pub payment_required: bool,
}

/// Read-only snapshot for polling clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketSnapshot {
    /// The ticket
    pub ticket: Ticket,
    /// Its payment, if priced
    pub payment: Option<Payment>,
}

/// Sells tickets
#[derive(Clone)]
pub struct PurchaseService {
    store: Arc<dyn TicketStore>,
    issuer: InvoiceIssuer,
    capacity: CapacityGuard,
    router: PaymentRouter,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl PurchaseService {
    /// Create the service. `base_url` prefixes the per-ticket pull callback.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        issuer: InvoiceIssuer,
        router: PaymentRouter,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            capacity: CapacityGuard::new(store.clone()),
            store,
            issuer,
            router,
            clock,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn callback_url(&self, ticket_id: TicketId) -> String {
        format!("{}/api/uma/payreq/{ticket_id}", self.base_url)
    }

    /// Buy a ticket for `event_id`.
    ///
    /// Free events complete immediately with status `free` and no payment.
    /// Priced events get a pending ticket, a payment and a per-ticket invoice,
    /// and payment routing starts in the background.
    ///
    /// # Errors
    ///
    /// Validation, capacity and issuance failures are returned before anything
    /// is stored.
    pub async fn purchase(
        &self,
        event_id: EventId,
        user_id: UserId,
        buyer_address: Option<&str>,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let result = self.try_purchase(event_id, user_id, buyer_address).await;
        match &result {
            Ok(receipt) if receipt.payment_required => metrics::record_purchase(PurchaseKind::Priced),
            Ok(_) => metrics::record_purchase(PurchaseKind::Free),
            Err(error) => {
                tracing::info!(%event_id, %user_id, %error, "Purchase rejected");
                metrics::record_purchase(PurchaseKind::Rejected);
            },
        }
        result
    }

    async fn try_purchase(
        &self,
        event_id: EventId,
        user_id: UserId,
        buyer_address: Option<&str>,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let buyer = buyer_address.map(UmaAddress::parse).transpose()?;

        let event = self
            .store
            .event(event_id)
            .await?
            .ok_or(PurchaseError::EventNotFound(event_id))?;
        self.capacity.ensure_available(&event).await?;

        let ticket_id = TicketId::new();
        let mut purchase = NewPurchase {
            ticket_id,
            event_id,
            user_id,
            code: TicketCode::generate(),
            buyer_address: buyer.as_ref().map(ToString::to_string),
            invoice: None,
            created_at: self.clock.now(),
        };

        if event.is_free() {
            let (ticket, _) = self.store.create_purchase(purchase).await?;
            tracing::info!(%ticket_id, %event_id, code = %ticket.code, "Free ticket issued");
            return Ok(PurchaseReceipt {
                ticket,
                payment: None,
                invoice: None,
                payment_required: false,
            });
        }

        let buyer = buyer.ok_or(PurchaseError::MissingAddress)?;
        let invoice = self
            .issuer
            .issue(ticket_id, &buyer.to_string(), event.price, &description(&event))
            .await?;
        purchase.invoice = Some(invoice.clone());

        let (ticket, payment) = match self.store.create_purchase(purchase).await {
            Ok(created) => created,
            Err(error) => {
                tracing::warn!(%ticket_id, invoice_id = %invoice.id, %error, "Issued invoice abandoned");
                return Err(error.into());
            },
        };

        let credential = self.credential_for(user_id).await;
        self.router.dispatch(DispatchContext {
            ticket_id,
            buyer,
            invoice: invoice.encoded.clone(),
            amount: invoice.amount,
            expires_at: invoice.expires_at,
            callback_url: self.callback_url(ticket_id),
            description: invoice.description.clone(),
            credential,
        });

        tracing::info!(%ticket_id, %event_id, amount = %invoice.amount, "Ticket reserved pending payment");
        Ok(PurchaseReceipt {
            ticket,
            payment,
            invoice: Some(invoice),
            payment_required: true,
        })
    }

    async fn credential_for(&self, user_id: UserId) -> Option<WalletCredential> {
        match self.store.wallet_credential(user_id).await {
            Ok(credential) => credential,
            Err(error) => {
                tracing::warn!(%user_id, %error, "Wallet credential lookup failed, routing by push");
                None
            },
        }
    }

    /// Current state of `ticket_id`
    ///
    /// # Errors
    ///
    /// Returns [`PurchaseError::TicketNotFound`] for unknown tickets.
    pub async fn status(&self, ticket_id: TicketId) -> Result<TicketSnapshot, PurchaseError> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(PurchaseError::TicketNotFound(ticket_id))?;
        let payment = self.store.payment_for_ticket(ticket_id).await?;
        Ok(TicketSnapshot { ticket, payment })
    }

    /// Retry a failed or expired payment: issue a fresh invoice, reset the
    /// ticket to pending and push a new request to the buyer's provider.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::NotRetryable`] unless the payment is failed or expired
    /// - [`PurchaseError::SoldOut`] if the released slot has since been taken
    /// - [`PurchaseError::Issuer`] if no fresh invoice can be issued
    pub async fn retry(&self, payment_id: PaymentId) -> Result<PurchaseReceipt, PurchaseError> {
        let payment = self
            .store
            .payment(payment_id)
            .await?
            .ok_or(PurchaseError::PaymentNotFound(payment_id))?;
        let ticket = self
            .store
            .ticket(payment.ticket_id)
            .await?
            .ok_or(PurchaseError::TicketNotFound(payment.ticket_id))?;

        let mut lifecycle = PaymentLifecycle::from_records(&ticket, &payment);
        let runner = self.router.runner();
        // Validation only: the reset is persisted by `reissue` below
        let effects = runner
            .reducer()
            .reduce(&mut lifecycle, LifecycleAction::RetryRequested, runner.environment());
        debug_assert!(effects.is_empty(), "RetryRequested effects are not executed");
        if lifecycle.last_error.is_some() {
            return Err(PurchaseError::NotRetryable {
                payment_id,
                status: payment.status,
            });
        }

        let buyer = ticket
            .buyer_address
            .as_deref()
            .ok_or(PurchaseError::MissingAddress)
            .and_then(|raw| UmaAddress::parse(raw).map_err(PurchaseError::from))?;
        let event = self
            .store
            .event(ticket.event_id)
            .await?
            .ok_or(PurchaseError::EventNotFound(ticket.event_id))?;
        self.capacity.ensure_available(&event).await?;

        let invoice = self
            .issuer
            .issue(ticket.id, &buyer.to_string(), payment.amount, &description(&event))
            .await?;
        let payment = self.store.reissue(payment_id, invoice.clone()).await?;
        metrics::record_payment_status(PaymentStatus::Pending);

        // Retries go straight to the push path
        self.router.dispatch(DispatchContext {
            ticket_id: ticket.id,
            buyer,
            invoice: invoice.encoded.clone(),
            amount: invoice.amount,
            expires_at: invoice.expires_at,
            callback_url: self.callback_url(ticket.id),
            description: invoice.description.clone(),
            credential: None,
        });

        let ticket = self
            .store
            .ticket(ticket.id)
            .await?
            .ok_or(PurchaseError::TicketNotFound(ticket.id))?;
        tracing::info!(ticket_id = %ticket.id, %payment_id, "Payment retried with fresh invoice");

        Ok(PurchaseReceipt {
            ticket,
            payment: Some(payment),
            invoice: Some(invoice),
            payment_required: true,
        })
    }
}

fn description(event: &Event) -> String {
    format!("Ticket: {}", event.title)
}
