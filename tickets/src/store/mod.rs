//! Persistence for events, tickets, payments, invoices and wallet credentials.
//!
//! [`TicketStore`] is the single persistence seam. Two operations carry the
//! concurrency guarantees the rest of the system relies on:
//!
//! - [`TicketStore::create_purchase`] checks capacity and inserts in one
//!   atomic step, so concurrent purchases cannot oversell an event
//! - [`TicketStore::apply_transition`] updates ticket and payment together and
//!   only when both are still in the expected status, so duplicate or racing
//!   transitions are no-ops

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTicketStore;
pub use postgres::PostgresTicketStore;

use crate::types::{
    Event, EventId, Invoice, Payment, PaymentId, PaymentStatus, Sats, Ticket, TicketCode,
    TicketId, TicketStatus, UserId, WalletCredential,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Store result
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Referenced record does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Event has no capacity left
    #[error("event {0} is sold out")]
    SoldOut(EventId),

    /// Event is not on sale
    #[error("event {0} is not active")]
    EventInactive(EventId),

    /// Unique constraint or guarded write conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure
    #[error("storage error: {0}")]
    Database(String),
}

/// A ticket (and, for priced events, its payment) to create atomically
#[derive(Clone, Debug)]
pub struct NewPurchase {
    /// Ticket ID, chosen before invoice issuance
    pub ticket_id: TicketId,
    /// Event
    pub event_id: EventId,
    /// Buyer
    pub user_id: UserId,
    /// Presentable code
    pub code: TicketCode,
    /// Buyer's address
    pub buyer_address: Option<String>,
    /// Invoice for priced events; `None` creates a free ticket
    pub invoice: Option<Invoice>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl NewPurchase {
    pub(crate) fn ticket(&self) -> Ticket {
        Ticket {
            id: self.ticket_id,
            event_id: self.event_id,
            user_id: self.user_id,
            code: self.code.clone(),
            status: if self.invoice.is_some() {
                TicketStatus::Pending
            } else {
                TicketStatus::Free
            },
            invoice_id: self.invoice.as_ref().map(|invoice| invoice.id.clone()),
            buyer_address: self.buyer_address.clone(),
            paid_at: None,
            created_at: self.created_at,
        }
    }

    pub(crate) fn payment(&self) -> Option<Payment> {
        self.invoice.as_ref().map(|invoice| Payment {
            id: PaymentId::new(),
            ticket_id: self.ticket_id,
            invoice: invoice.encoded.clone(),
            amount: invoice.amount,
            status: PaymentStatus::Pending,
            paid_at: None,
            counterparty_callback: None,
            created_at: self.created_at,
        })
    }
}

/// A guarded status change applied to a ticket and its payment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Status both rows must currently have
    pub from: PaymentStatus,
    /// New status
    pub to: PaymentStatus,
    /// Time of the change; recorded as `paid_at` when `to` is paid
    pub at: DateTime<Utc>,
}

impl Transition {
    pub(crate) fn paid_at(&self) -> Option<DateTime<Utc>> {
        (self.to == PaymentStatus::Paid).then_some(self.at)
    }
}

/// Ticketing persistence
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert or replace an event
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn put_event(&self, event: &Event) -> StoreResult<()>;

    /// Load an event
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn event(&self, id: EventId) -> StoreResult<Option<Event>>;

    /// Tickets currently holding a slot for `event_id`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn held_count(&self, event_id: EventId) -> StoreResult<u32>;

    /// Load a ticket
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>>;

    /// Load a payment
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn payment(&self, id: PaymentId) -> StoreResult<Option<Payment>>;

    /// The payment attached to a ticket
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn payment_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Payment>>;

    /// Create a ticket, its payment and invoice if the event still has room.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the event does not exist
    /// - [`StoreError::EventInactive`] if the event is not on sale
    /// - [`StoreError::SoldOut`] if every slot is held
    async fn create_purchase(&self, purchase: NewPurchase) -> StoreResult<(Ticket, Option<Payment>)>;

    /// Payment whose invoice is `encoded`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn payment_by_invoice(&self, encoded: &str) -> StoreResult<Option<Payment>>;

    /// Oldest pending payment for exactly `amount`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn oldest_pending_payment_with_amount(&self, amount: Sats) -> StoreResult<Option<Payment>>;

    /// Apply `transition` to the ticket and its payment together.
    ///
    /// Returns `false` without changing anything when the payment is not in
    /// `transition.from`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn apply_transition(&self, ticket_id: TicketId, transition: Transition) -> StoreResult<bool>;

    /// Swap a fresh invoice into a failed or expired payment and reset it and
    /// its ticket to pending.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the payment does not exist
    /// - [`StoreError::Conflict`] if the payment is not failed or expired
    /// - [`StoreError::EventInactive`] if the event no longer sells tickets
    /// - [`StoreError::SoldOut`] if the slot it released has been taken
    async fn reissue(&self, payment_id: PaymentId, invoice: Invoice) -> StoreResult<Payment>;

    /// Pending payments whose invoice expired at or before `now`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> StoreResult<Vec<Payment>>;

    /// Remember where to send the post-settlement callback
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn record_counterparty_callback(&self, payment_id: PaymentId, url: &str) -> StoreResult<()>;

    /// Buyer's wallet credential
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn wallet_credential(&self, user_id: UserId) -> StoreResult<Option<WalletCredential>>;

    /// Insert or replace a buyer's wallet credential
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn upsert_wallet_credential(&self, credential: &WalletCredential) -> StoreResult<()>;

    /// Current invoice of a ticket
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    async fn invoice_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Invoice>>;
}
