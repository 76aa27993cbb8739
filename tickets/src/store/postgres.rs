//! PostgreSQL-backed [`TicketStore`].
//!
//! # Concurrency
//!
//! - `create_purchase` locks the event row (`SELECT ... FOR UPDATE`) for the
//!   duration of the count and insert, serialising purchases per event
//! - `apply_transition` and `reissue` are single transactions whose updates are
//!   guarded on the current status

use super::{NewPurchase, StoreError, StoreResult, TicketStore, Transition};
use crate::capacity;
use crate::types::{
    Event, EventId, Invoice, Payment, PaymentId, PaymentStatus, Sats, Ticket, TicketCode,
    TicketId, TicketStatus, UserId, WalletCredential,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

const TICKET_COLUMNS: &str =
    "id, event_id, user_id, code, status, invoice_id, buyer_address, paid_at, created_at";
const PAYMENT_COLUMNS: &str =
    "id, ticket_id, invoice, amount_sats, status, paid_at, counterparty_callback, created_at";
const INVOICE_COLUMNS: &str =
    "id, ticket_id, payment_hash, encoded, amount_sats, expires_at, issuing_address, description";

// ============================================================================
// Rows
// ============================================================================

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    capacity: i32,
    price_sats: i64,
    active: bool,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> StoreResult<Self> {
        Ok(Self {
            id: EventId::from_uuid(row.id),
            title: row.title,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            capacity: u32::try_from(row.capacity)
                .map_err(|_| StoreError::Database(format!("negative capacity: {}", row.capacity)))?,
            price: sats_from_db(row.price_sats)?,
            active: row.active,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    code: String,
    status: String,
    invoice_id: Option<String>,
    buyer_address: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> StoreResult<Self> {
        Ok(Self {
            id: TicketId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            user_id: UserId::from_uuid(row.user_id),
            code: TicketCode::from_string(row.code),
            status: row
                .status
                .parse::<TicketStatus>()
                .map_err(|e| StoreError::Database(e.to_string()))?,
            invoice_id: row.invoice_id,
            buyer_address: row.buyer_address,
            paid_at: row.paid_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    ticket_id: Uuid,
    invoice: String,
    amount_sats: i64,
    status: String,
    paid_at: Option<DateTime<Utc>>,
    counterparty_callback: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> StoreResult<Self> {
        Ok(Self {
            id: PaymentId::from_uuid(row.id),
            ticket_id: TicketId::from_uuid(row.ticket_id),
            invoice: row.invoice,
            amount: sats_from_db(row.amount_sats)?,
            status: row
                .status
                .parse::<PaymentStatus>()
                .map_err(|e| StoreError::Database(e.to_string()))?,
            paid_at: row.paid_at,
            counterparty_callback: row.counterparty_callback,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    id: String,
    ticket_id: Uuid,
    payment_hash: String,
    encoded: String,
    amount_sats: i64,
    expires_at: DateTime<Utc>,
    issuing_address: String,
    description: String,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = StoreError;

    fn try_from(row: InvoiceRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            ticket_id: TicketId::from_uuid(row.ticket_id),
            payment_hash: row.payment_hash,
            encoded: row.encoded,
            amount: sats_from_db(row.amount_sats)?,
            expires_at: row.expires_at,
            issuing_address: row.issuing_address,
            description: row.description,
        })
    }
}

#[derive(FromRow)]
struct CredentialRow {
    user_id: Uuid,
    connection_uri: String,
    expires_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<CredentialRow> for WalletCredential {
    fn from(row: CredentialRow) -> Self {
        Self {
            user_id: UserId::from_uuid(row.user_id),
            connection_uri: row.connection_uri,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        }
    }
}

fn sats_from_db(value: i64) -> StoreResult<Sats> {
    u64::try_from(value)
        .map(Sats::new)
        .map_err(|_| StoreError::Database(format!("negative amount: {value}")))
}

fn sats_to_db(sats: Sats) -> StoreResult<i64> {
    i64::try_from(sats.get()).map_err(|_| StoreError::Database(format!("amount out of range: {sats}")))
}

fn db_error(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| {
        if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
            StoreError::Conflict(format!("{context}: {e}"))
        } else {
            StoreError::Database(format!("{context}: {e}"))
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Tickets holding a capacity slot
const HELD_COUNT_SQL: &str =
    "SELECT COUNT(*) FROM tickets WHERE event_id = $1 AND status IN ('pending', 'paid', 'free')";

/// [`TicketStore`] on a PostgreSQL pool
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(url: &str, max_connections: u32, connect_timeout: Duration) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(db_error("Failed to connect"))?;
        Ok(Self::new(pool))
    }

    /// Run embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))
    }

    async fn held_in(tx: &mut Transaction<'static, Postgres>, event_id: EventId) -> StoreResult<u32> {
        let (held,): (i64,) = sqlx::query_as(HELD_COUNT_SQL)
            .bind(event_id.as_uuid())
            .fetch_one(&mut **tx)
            .await
            .map_err(db_error("Failed to count tickets"))?;
        Ok(u32::try_from(held).unwrap_or(u32::MAX))
    }

    async fn upsert_invoice(tx: &mut Transaction<'static, Postgres>, invoice: &Invoice) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO invoices
                 (ticket_id, id, payment_hash, encoded, amount_sats, expires_at, issuing_address, description)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (ticket_id) DO UPDATE SET
                 id = EXCLUDED.id,
                 payment_hash = EXCLUDED.payment_hash,
                 encoded = EXCLUDED.encoded,
                 amount_sats = EXCLUDED.amount_sats,
                 expires_at = EXCLUDED.expires_at,
                 issuing_address = EXCLUDED.issuing_address,
                 description = EXCLUDED.description",
        )
        .bind(invoice.ticket_id.as_uuid())
        .bind(&invoice.id)
        .bind(&invoice.payment_hash)
        .bind(&invoice.encoded)
        .bind(sats_to_db(invoice.amount)?)
        .bind(invoice.expires_at)
        .bind(&invoice.issuing_address)
        .bind(&invoice.description)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to save invoice"))?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for PostgresTicketStore {
    async fn put_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO events (id, title, starts_at, ends_at, capacity, price_sats, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                 title = EXCLUDED.title,
                 starts_at = EXCLUDED.starts_at,
                 ends_at = EXCLUDED.ends_at,
                 capacity = EXCLUDED.capacity,
                 price_sats = EXCLUDED.price_sats,
                 active = EXCLUDED.active",
        )
        .bind(event.id.as_uuid())
        .bind(&event.title)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(i32::try_from(event.capacity).unwrap_or(i32::MAX))
        .bind(sats_to_db(event.price)?)
        .bind(event.active)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save event"))?;
        Ok(())
    }

    async fn event(&self, id: EventId) -> StoreResult<Option<Event>> {
        sqlx::query_as::<_, EventRow>(
            "SELECT id, title, starts_at, ends_at, capacity, price_sats, active
             FROM events WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load event"))?
        .map(Event::try_from)
        .transpose()
    }

    async fn held_count(&self, event_id: EventId) -> StoreResult<u32> {
        let (held,): (i64,) = sqlx::query_as(HELD_COUNT_SQL)
            .bind(event_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count tickets"))?;
        Ok(u32::try_from(held).unwrap_or(u32::MAX))
    }

    async fn ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>> {
        sqlx::query_as::<_, TicketRow>(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load ticket"))?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn payment(&self, id: PaymentId) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load payment"))?
            .map(Payment::try_from)
            .transpose()
    }

    async fn payment_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE ticket_id = $1"
        ))
        .bind(ticket_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load payment"))?
        .map(Payment::try_from)
        .transpose()
    }

    async fn create_purchase(&self, purchase: NewPurchase) -> StoreResult<(Ticket, Option<Payment>)> {
        let mut tx = self.begin().await?;

        let event: Event = sqlx::query_as::<_, EventRow>(
            "SELECT id, title, starts_at, ends_at, capacity, price_sats, active
             FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(purchase.event_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock event"))?
        .ok_or_else(|| StoreError::NotFound(format!("event {}", purchase.event_id)))?
        .try_into()?;

        if !event.active {
            return Err(StoreError::EventInactive(event.id));
        }

        let held = Self::held_in(&mut tx, event.id).await?;
        if !capacity::has_room(&event, held) {
            return Err(StoreError::SoldOut(event.id));
        }

        let ticket = purchase.ticket();
        sqlx::query(
            "INSERT INTO tickets
                 (id, event_id, user_id, code, status, invoice_id, buyer_address, paid_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.event_id.as_uuid())
        .bind(ticket.user_id.as_uuid())
        .bind(ticket.code.as_str())
        .bind(ticket.status.as_str())
        .bind(&ticket.invoice_id)
        .bind(&ticket.buyer_address)
        .bind(ticket.paid_at)
        .bind(ticket.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to insert ticket"))?;

        let payment = purchase.payment();
        if let Some(payment) = &payment {
            sqlx::query(
                "INSERT INTO payments (id, ticket_id, invoice, amount_sats, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(payment.id.as_uuid())
            .bind(payment.ticket_id.as_uuid())
            .bind(&payment.invoice)
            .bind(sats_to_db(payment.amount)?)
            .bind(payment.status.as_str())
            .bind(payment.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert payment"))?;
        }
        if let Some(invoice) = &purchase.invoice {
            Self::upsert_invoice(&mut tx, invoice).await?;
        }

        tx.commit().await.map_err(db_error("Failed to commit purchase"))?;
        Ok((ticket, payment))
    }

    async fn payment_by_invoice(&self, encoded: &str) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE invoice = $1"
        ))
        .bind(encoded)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to look up invoice"))?
        .map(Payment::try_from)
        .transpose()
    }

    async fn oldest_pending_payment_with_amount(&self, amount: Sats) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE status = 'pending' AND amount_sats = $1
             ORDER BY created_at ASC
             LIMIT 1"
        ))
        .bind(sats_to_db(amount)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to look up payment by amount"))?
        .map(Payment::try_from)
        .transpose()
    }

    async fn apply_transition(&self, ticket_id: TicketId, transition: Transition) -> StoreResult<bool> {
        let mut tx = self.begin().await?;

        let updated: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE payments SET status = $1, paid_at = $2
             WHERE ticket_id = $3 AND status = $4
             RETURNING id",
        )
        .bind(transition.to.as_str())
        .bind(transition.paid_at())
        .bind(ticket_id.as_uuid())
        .bind(transition.from.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to update payment"))?;

        if updated.is_none() {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM payments WHERE ticket_id = $1)")
                    .bind(ticket_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_error("Failed to check payment"))?;
            return if exists {
                Ok(false)
            } else {
                Err(StoreError::NotFound(format!("payment for ticket {ticket_id}")))
            };
        }

        sqlx::query("UPDATE tickets SET status = $1, paid_at = $2 WHERE id = $3")
            .bind(TicketStatus::from(transition.to).as_str())
            .bind(transition.paid_at())
            .bind(ticket_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to update ticket"))?;

        tx.commit().await.map_err(db_error("Failed to commit transition"))?;
        Ok(true)
    }

    async fn reissue(&self, payment_id: PaymentId, invoice: Invoice) -> StoreResult<Payment> {
        let mut tx = self.begin().await?;

        // Event row first, in the same order as create_purchase
        let event: Event = sqlx::query_as::<_, EventRow>(
            "SELECT e.id, e.title, e.starts_at, e.ends_at, e.capacity, e.price_sats, e.active
             FROM events e
             JOIN tickets t ON t.event_id = e.id
             JOIN payments p ON p.ticket_id = t.id
             WHERE p.id = $1
             FOR UPDATE OF e",
        )
        .bind(payment_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock event"))?
        .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?
        .try_into()?;

        let current: Payment = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(payment_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock payment"))?
        .ok_or_else(|| StoreError::NotFound(format!("payment {payment_id}")))?
        .try_into()?;

        if !current.status.is_retryable() {
            return Err(StoreError::Conflict(format!(
                "payment {payment_id} is {} and cannot be retried",
                current.status
            )));
        }
        if !event.active {
            return Err(StoreError::EventInactive(event.id));
        }

        let held = Self::held_in(&mut tx, event.id).await?;
        if !capacity::has_room(&event, held) {
            return Err(StoreError::SoldOut(event.id));
        }

        let updated: Payment = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = 'pending', invoice = $2, amount_sats = $3, paid_at = NULL,
                 counterparty_callback = NULL
             WHERE id = $1
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id.as_uuid())
        .bind(&invoice.encoded)
        .bind(sats_to_db(invoice.amount)?)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to reset payment"))?
        .try_into()?;

        sqlx::query(
            "UPDATE tickets SET status = 'pending', invoice_id = $2, paid_at = NULL WHERE id = $1",
        )
        .bind(updated.ticket_id.as_uuid())
        .bind(&invoice.id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to reset ticket"))?;

        Self::upsert_invoice(&mut tx, &invoice).await?;

        tx.commit().await.map_err(db_error("Failed to commit reissue"))?;
        Ok(updated)
    }

    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT p.id, p.ticket_id, p.invoice, p.amount_sats, p.status, p.paid_at,
                    p.counterparty_callback, p.created_at
             FROM payments p
             JOIN invoices i ON i.ticket_id = p.ticket_id
             WHERE p.status = 'pending' AND i.expires_at <= $1
             ORDER BY p.created_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list expired payments"))?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn record_counterparty_callback(&self, payment_id: PaymentId, url: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE payments SET counterparty_callback = $2 WHERE id = $1")
            .bind(payment_id.as_uuid())
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to record callback"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment {payment_id}")));
        }
        Ok(())
    }

    async fn wallet_credential(&self, user_id: UserId) -> StoreResult<Option<WalletCredential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT user_id, connection_uri, expires_at, updated_at
             FROM wallet_credentials WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load wallet credential"))?;
        Ok(row.map(WalletCredential::from))
    }

    async fn upsert_wallet_credential(&self, credential: &WalletCredential) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO wallet_credentials (user_id, connection_uri, expires_at, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id) DO UPDATE SET
                 connection_uri = EXCLUDED.connection_uri,
                 expires_at = EXCLUDED.expires_at,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(credential.user_id.as_uuid())
        .bind(&credential.connection_uri)
        .bind(credential.expires_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save wallet credential"))?;
        Ok(())
    }

    async fn invoice_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Invoice>> {
        sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE ticket_id = $1"
        ))
        .bind(ticket_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load invoice"))?
        .map(Invoice::try_from)
        .transpose()
    }
}
