//! Invoice issuance: validates the buyer and amount, then asks the processor
//! for a per-ticket invoice.

use crate::lightning::{InvoiceSpec, LightningProcessor, ProcessorError};
use crate::types::{Invoice, Sats, TicketId};
use crate::uma::{AddressError, UmaAddress};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uma_tickets_core::environment::Clock;

/// Issuance failure. Nothing is persisted when issuance fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueError {
    /// Buyer address does not match `$localpart@domain`
    #[error("invalid buyer address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Amount must be positive
    #[error("invoice amount must be greater than zero")]
    ZeroAmount,

    /// Processor could not issue the invoice
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Issues invoices scoped to a single ticket.
#[derive(Clone)]
pub struct InvoiceIssuer {
    processor: Arc<dyn LightningProcessor>,
    clock: Arc<dyn Clock>,
    receiving_address: UmaAddress,
    expiry: Duration,
}

impl InvoiceIssuer {
    /// Create an issuer that issues under `receiving_address`
    #[must_use]
    pub fn new(
        processor: Arc<dyn LightningProcessor>,
        clock: Arc<dyn Clock>,
        receiving_address: UmaAddress,
        expiry: Duration,
    ) -> Self {
        Self {
            processor,
            clock,
            receiving_address,
            expiry,
        }
    }

    /// Address invoices are issued under
    #[must_use]
    pub const fn receiving_address(&self) -> &UmaAddress {
        &self.receiving_address
    }

    /// Issue an invoice for `ticket_id`.
    ///
    /// # Errors
    ///
    /// - [`IssueError::InvalidAddress`] if `buyer_address` is malformed
    /// - [`IssueError::ZeroAmount`] if `amount` is zero
    /// - [`IssueError::Processor`] if the processor fails
    pub async fn issue(
        &self,
        ticket_id: TicketId,
        buyer_address: &str,
        amount: Sats,
        description: &str,
    ) -> Result<Invoice, IssueError> {
        let buyer = UmaAddress::parse(buyer_address)?;
        if amount.is_zero() {
            return Err(IssueError::ZeroAmount);
        }

        let spec = InvoiceSpec {
            amount,
            description: description.to_string(),
            expiry: self.expiry,
        };
        let issued = self.processor.create_invoice(&spec).await?;

        let expires_at = issued.expires_at.unwrap_or_else(|| {
            self.clock.now()
                + ChronoDuration::from_std(self.expiry).unwrap_or_else(|_| ChronoDuration::hours(1))
        });

        tracing::debug!(
            ticket_id = %ticket_id,
            invoice_id = %issued.id,
            buyer = %buyer,
            amount = %amount,
            "Invoice issued"
        );

        Ok(Invoice {
            id: issued.id,
            ticket_id,
            payment_hash: issued.payment_hash,
            encoded: issued.encoded_payment_request,
            amount,
            expires_at,
            issuing_address: self.receiving_address.to_string(),
            description: spec.description,
        })
    }
}
