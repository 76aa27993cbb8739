//! In-memory [`TicketStore`].
//!
//! All tables live behind one mutex, which makes every operation (including
//! the capacity check plus insert) atomic.

use super::{NewPurchase, StoreError, StoreResult, TicketStore, Transition};
use crate::capacity;
use crate::types::{
    Event, EventId, Invoice, Payment, PaymentId, PaymentStatus, Sats, Ticket, TicketId,
    TicketStatus, UserId, WalletCredential,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    tickets: HashMap<TicketId, Ticket>,
    payments: HashMap<PaymentId, Payment>,
    invoices: HashMap<TicketId, Invoice>,
    credentials: HashMap<UserId, WalletCredential>,
}

impl Tables {
    fn held_count(&self, event_id: EventId) -> u32 {
        let held = self
            .tickets
            .values()
            .filter(|ticket| ticket.event_id == event_id && ticket.status.holds_capacity())
            .count();
        u32::try_from(held).unwrap_or(u32::MAX)
    }

    fn payment_id_for_ticket(&self, ticket_id: TicketId) -> Option<PaymentId> {
        self.payments
            .values()
            .find(|payment| payment.ticket_id == ticket_id)
            .map(|payment| payment.id)
    }
}

/// [`TicketStore`] backed by hash maps
#[derive(Clone, Default)]
pub struct InMemoryTicketStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryTicketStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn put_event(&self, event: &Event) -> StoreResult<()> {
        self.tables.lock().await.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn event(&self, id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.tables.lock().await.events.get(&id).cloned())
    }

    async fn held_count(&self, event_id: EventId) -> StoreResult<u32> {
        Ok(self.tables.lock().await.held_count(event_id))
    }

    async fn ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>> {
        Ok(self.tables.lock().await.tickets.get(&id).cloned())
    }

    async fn payment(&self, id: PaymentId) -> StoreResult<Option<Payment>> {
        Ok(self.tables.lock().await.payments.get(&id).cloned())
    }

    async fn payment_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Payment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payment_id_for_ticket(ticket_id)
            .and_then(|id| tables.payments.get(&id).cloned()))
    }

    async fn create_purchase(&self, purchase: NewPurchase) -> StoreResult<(Ticket, Option<Payment>)> {
        let mut tables = self.tables.lock().await;

        let event = tables
            .events
            .get(&purchase.event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", purchase.event_id)))?;
        if !event.active {
            return Err(StoreError::EventInactive(event.id));
        }
        if !capacity::has_room(event, tables.held_count(event.id)) {
            return Err(StoreError::SoldOut(event.id));
        }
        if tables.tickets.values().any(|ticket| ticket.code == purchase.code) {
            return Err(StoreError::Conflict(format!("ticket code {} in use", purchase.code)));
        }
        if let Some(invoice) = &purchase.invoice {
            if tables.payments.values().any(|payment| payment.invoice == invoice.encoded) {
                return Err(StoreError::Conflict("invoice already attached".to_string()));
            }
        }

        let ticket = purchase.ticket();
        let payment = purchase.payment();
        tables.tickets.insert(ticket.id, ticket.clone());
        if let Some(payment) = &payment {
            tables.payments.insert(payment.id, payment.clone());
        }
        if let Some(invoice) = purchase.invoice {
            tables.invoices.insert(ticket.id, invoice);
        }
        Ok((ticket, payment))
    }

    async fn payment_by_invoice(&self, encoded: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables
            .lock()
            .await
            .payments
            .values()
            .find(|payment| payment.invoice == encoded)
            .cloned())
    }

    async fn oldest_pending_payment_with_amount(&self, amount: Sats) -> StoreResult<Option<Payment>> {
        Ok(self
            .tables
            .lock()
            .await
            .payments
            .values()
            .filter(|payment| payment.status == PaymentStatus::Pending && payment.amount == amount)
            .min_by_key(|payment| payment.created_at)
            .cloned())
    }

    async fn apply_transition(&self, ticket_id: TicketId, transition: Transition) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;

        let Some(payment_id) = tables.payment_id_for_ticket(ticket_id) else {
            return Err(StoreError::NotFound(format!("payment for ticket {ticket_id}")));
        };
        let Some(payment) = tables.payments.get_mut(&payment_id) else {
            return Err(StoreError::NotFound(format!("payment {payment_id}")));
        };
        if payment.status != transition.from {
            return Ok(false);
        }
        payment.status = transition.to;
        payment.paid_at = transition.paid_at();

        if let Some(ticket) = tables.tickets.get_mut(&ticket_id) {
            ticket.status = TicketStatus::from(transition.to);
            ticket.paid_at = transition.paid_at();
        }
        Ok(true)
    }

    async fn reissue(&self, payment_id: PaymentId, invoice: Invoice) -> StoreResult<Payment> {
        let mut tables = self.tables.lock().await;

        let current = tables
            .payments
            .get(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;
        if !current.status.is_retryable() {
            return Err(StoreError::Conflict(format!(
                "payment {payment_id} is {} and cannot be retried",
                current.status
            )));
        }
        let event_id = tables
            .tickets
            .get(&current.ticket_id)
            .map(|ticket| ticket.event_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", current.ticket_id)))?;
        let event = tables
            .events
            .get(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
        if !event.active {
            return Err(StoreError::EventInactive(event_id));
        }
        // The retried ticket is failed or expired, so it is not in the count
        if !capacity::has_room(event, tables.held_count(event_id)) {
            return Err(StoreError::SoldOut(event_id));
        }

        let payment = tables
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;
        payment.status = PaymentStatus::Pending;
        payment.invoice.clone_from(&invoice.encoded);
        payment.amount = invoice.amount;
        payment.paid_at = None;
        payment.counterparty_callback = None;
        let updated = payment.clone();

        if let Some(ticket) = tables.tickets.get_mut(&updated.ticket_id) {
            ticket.status = TicketStatus::Pending;
            ticket.invoice_id = Some(invoice.id.clone());
            ticket.paid_at = None;
        }
        tables.invoices.insert(updated.ticket_id, invoice);
        Ok(updated)
    }

    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.lock().await;
        let mut expired: Vec<Payment> = tables
            .payments
            .values()
            .filter(|payment| payment.status == PaymentStatus::Pending)
            .filter(|payment| {
                tables
                    .invoices
                    .get(&payment.ticket_id)
                    .is_some_and(|invoice| invoice.is_expired(now))
            })
            .cloned()
            .collect();
        expired.sort_by_key(|payment| payment.created_at);
        Ok(expired)
    }

    async fn record_counterparty_callback(&self, payment_id: PaymentId, url: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?;
        payment.counterparty_callback = Some(url.to_string());
        Ok(())
    }

    async fn wallet_credential(&self, user_id: UserId) -> StoreResult<Option<WalletCredential>> {
        Ok(self.tables.lock().await.credentials.get(&user_id).cloned())
    }

    async fn upsert_wallet_credential(&self, credential: &WalletCredential) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .credentials
            .insert(credential.user_id, credential.clone());
        Ok(())
    }

    async fn invoice_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Invoice>> {
        Ok(self.tables.lock().await.invoices.get(&ticket_id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::TicketCode;
    use chrono::Duration;

    fn event(capacity: u32, price: u64) -> Event {
        Event {
            id: EventId::new(),
            title: "Bitcoin meetup".to_string(),
            starts_at: Utc::now() + Duration::days(7),
            ends_at: Utc::now() + Duration::days(7) + Duration::hours(3),
            capacity,
            price: Sats::new(price),
            active: true,
        }
    }

    fn invoice(ticket_id: TicketId, amount: u64, expires_at: DateTime<Utc>) -> Invoice {
        Invoice {
            id: format!("inv-{ticket_id}"),
            ticket_id,
            payment_hash: "hash".to_string(),
            encoded: format!("lnbcrt{amount}n1{ticket_id}"),
            amount: Sats::new(amount),
            expires_at,
            issuing_address: "$tickets@events.example".to_string(),
            description: "Ticket".to_string(),
        }
    }

    fn purchase(event: &Event, invoice: Option<Invoice>, ticket_id: TicketId) -> NewPurchase {
        NewPurchase {
            ticket_id,
            event_id: event.id,
            user_id: UserId::new(),
            code: TicketCode::generate(),
            buyer_address: Some("$alice@example.com".to_string()),
            invoice,
            created_at: Utc::now(),
        }
    }

    async fn priced_purchase(store: &InMemoryTicketStore, event: &Event) -> StoreResult<(Ticket, Option<Payment>)> {
        let ticket_id = TicketId::new();
        let invoice = invoice(ticket_id, event.price.get(), Utc::now() + Duration::minutes(10));
        store.create_purchase(purchase(event, Some(invoice), ticket_id)).await
    }

    #[tokio::test]
    async fn test_capacity_n_then_sold_out() {
        let store = InMemoryTicketStore::new();
        let event = event(2, 1_000);
        store.put_event(&event).await.unwrap();

        priced_purchase(&store, &event).await.unwrap();
        priced_purchase(&store, &event).await.unwrap();
        let third = priced_purchase(&store, &event).await;

        assert_eq!(third.unwrap_err(), StoreError::SoldOut(event.id));
        assert_eq!(store.held_count(event.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_ticket_releases_slot() {
        let store = InMemoryTicketStore::new();
        let event = event(1, 1_000);
        store.put_event(&event).await.unwrap();

        let (ticket, _) = priced_purchase(&store, &event).await.unwrap();
        let failed = Transition {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Failed,
            at: Utc::now(),
        };
        assert!(store.apply_transition(ticket.id, failed).await.unwrap());

        assert!(priced_purchase(&store, &event).await.is_ok());
    }

    #[tokio::test]
    async fn test_free_purchase_has_no_payment() {
        let store = InMemoryTicketStore::new();
        let event = event(10, 0);
        store.put_event(&event).await.unwrap();

        let ticket_id = TicketId::new();
        let (ticket, payment) = store
            .create_purchase(purchase(&event, None, ticket_id))
            .await
            .unwrap();

        assert_eq!(ticket.status, TicketStatus::Free);
        assert!(payment.is_none());
        assert!(store.payment_for_ticket(ticket_id).await.unwrap().is_none());
        assert!(store.invoice_for_ticket(ticket_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_guarded() {
        let store = InMemoryTicketStore::new();
        let event = event(5, 1_000);
        store.put_event(&event).await.unwrap();
        let (ticket, _) = priced_purchase(&store, &event).await.unwrap();

        let paid = Transition {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Paid,
            at: Utc::now(),
        };
        assert!(store.apply_transition(ticket.id, paid).await.unwrap());
        assert!(!store.apply_transition(ticket.id, paid).await.unwrap());

        let failed = Transition {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Failed,
            at: Utc::now(),
        };
        assert!(!store.apply_transition(ticket.id, failed).await.unwrap());

        let stored = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Paid);
        assert_eq!(stored.paid_at, Some(paid.at));
    }

    #[tokio::test]
    async fn test_oldest_pending_with_amount() {
        let store = InMemoryTicketStore::new();
        let event = event(5, 1_000);
        store.put_event(&event).await.unwrap();

        let mut first_payment = None;
        for minutes_ago in [30, 10] {
            let ticket_id = TicketId::new();
            let mut new = purchase(
                &event,
                Some(invoice(ticket_id, 1_000, Utc::now() + Duration::minutes(10))),
                ticket_id,
            );
            new.created_at = Utc::now() - Duration::minutes(minutes_ago);
            let (_, payment) = store.create_purchase(new).await.unwrap();
            first_payment = first_payment.or(payment);
        }

        let found = store
            .oldest_pending_payment_with_amount(Sats::new(1_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(found.id), first_payment.map(|payment| payment.id));
        assert!(
            store
                .oldest_pending_payment_with_amount(Sats::new(999))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_reissue_only_from_failed_or_expired() {
        let store = InMemoryTicketStore::new();
        let event = event(5, 1_000);
        store.put_event(&event).await.unwrap();
        let (ticket, payment) = priced_purchase(&store, &event).await.unwrap();
        let payment = payment.unwrap();

        let mut fresh = invoice(ticket.id, 1_000, Utc::now() + Duration::minutes(20));
        fresh.encoded = "lnbcrt-fresh".to_string();

        assert!(matches!(
            store.reissue(payment.id, fresh.clone()).await,
            Err(StoreError::Conflict(_))
        ));

        let expired = Transition {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Expired,
            at: Utc::now(),
        };
        store.apply_transition(ticket.id, expired).await.unwrap();

        let reissued = store.reissue(payment.id, fresh).await.unwrap();
        assert_eq!(reissued.status, PaymentStatus::Pending);
        assert_eq!(reissued.invoice, "lnbcrt-fresh");
        assert_eq!(
            store.ticket(ticket.id).await.unwrap().unwrap().status,
            TicketStatus::Pending
        );
        assert!(store.payment_by_invoice("lnbcrt-fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reissue_refuses_when_released_slot_was_taken() {
        let store = InMemoryTicketStore::new();
        let event = event(1, 1_000);
        store.put_event(&event).await.unwrap();

        let (first, payment) = priced_purchase(&store, &event).await.unwrap();
        let failed = Transition {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Failed,
            at: Utc::now(),
        };
        store.apply_transition(first.id, failed).await.unwrap();
        priced_purchase(&store, &event).await.unwrap();

        let mut fresh = invoice(first.id, 1_000, Utc::now() + Duration::minutes(20));
        fresh.encoded = "lnbcrt-fresh".to_string();
        let result = store.reissue(payment.unwrap().id, fresh).await;

        assert_eq!(result.unwrap_err(), StoreError::SoldOut(event.id));
        assert_eq!(store.held_count(event.id).await.unwrap(), 1);
        assert_eq!(
            store.ticket(first.id).await.unwrap().unwrap().status,
            TicketStatus::Failed
        );
        assert!(store.payment_by_invoice("lnbcrt-fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_pending_payments() {
        let store = InMemoryTicketStore::new();
        let event = event(5, 1_000);
        store.put_event(&event).await.unwrap();

        let stale_ticket = TicketId::new();
        let stale = invoice(stale_ticket, 1_000, Utc::now() - Duration::minutes(1));
        store
            .create_purchase(purchase(&event, Some(stale), stale_ticket))
            .await
            .unwrap();
        priced_purchase(&store, &event).await.unwrap();

        let expired = store.expired_pending_payments(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ticket_id, stale_ticket);
    }
}
