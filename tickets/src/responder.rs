//! Protocol responder: discovery documents and counterparty pull requests.
//!
//! A counterparty never receives raw payment data from us; after a push it
//! calls back for the invoice we already issued. Protocol-level failures are
//! returned as [`ProtocolError`] envelopes, which the HTTP layer sends with
//! status 200.

use crate::lifecycle::negotiate_version;
use crate::store::{StoreError, TicketStore};
use crate::types::{Payment, PaymentStatus, Sats, TicketId};
use crate::uma::{
    ConvertedAmount, Currency, PAY_REQUEST_TAG, PayRequestBody, PayRequestResponse,
    PayableParameters, ProtocolError, UmaAddress, UmaConfiguration, UmaEnvelope, UmaPayRequest,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use uma_tickets_core::environment::Clock;

/// Millisatoshis per satoshi
const MSATS_PER_SAT: f64 = 1_000.0;

/// Static parameters of the receiving side
#[derive(Clone, Debug)]
pub struct ResponderConfig {
    /// Public base URL, e.g. `https://tickets.example`
    pub base_url: String,
    /// Address tickets are paid to
    pub receiver: UmaAddress,
    /// Smallest payable amount in millisatoshis
    pub min_sendable_msats: u64,
    /// Largest payable amount in millisatoshis
    pub max_sendable_msats: u64,
    /// Protocol major versions we speak, highest first
    pub supported_versions: Vec<u32>,
}

impl ResponderConfig {
    /// Pull callback unique to `ticket_id`
    #[must_use]
    pub fn payreq_url(&self, ticket_id: TicketId) -> String {
        format!("{}/api/uma/payreq/{ticket_id}", self.base_url.trim_end_matches('/'))
    }

    fn amount_callback_url(&self) -> String {
        format!("{}/api/uma/callback", self.base_url.trim_end_matches('/'))
    }
}

/// Why the richer UMA envelope could not be built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Sender asked for a currency we do not quote
    #[error("unsupported receiving currency {0}")]
    UnsupportedCurrency(String),

    /// No protocol version in common
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

/// Answers discovery and pull requests
#[derive(Clone)]
pub struct ProtocolResponder {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    config: ResponderConfig,
}

impl ProtocolResponder {
    /// Create a responder
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, config: ResponderConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Receiving-side parameters
    #[must_use]
    pub const fn config(&self) -> &ResponderConfig {
        &self.config
    }

    fn sat_currency(&self) -> Currency {
        Currency {
            code: "SAT".to_string(),
            name: "Satoshis".to_string(),
            symbol: "sat".to_string(),
            multiplier: MSATS_PER_SAT,
            decimals: 0,
            min_sendable: self.config.min_sendable_msats / 1_000,
            max_sendable: self.config.max_sendable_msats / 1_000,
        }
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// LNURL pay parameters for `username`; `None` if it is not our receiver
    #[must_use]
    pub fn payable_parameters(&self, username: &str) -> Option<PayableParameters> {
        if !username.eq_ignore_ascii_case(self.config.receiver.local_part()) {
            return None;
        }
        let metadata = json!([
            ["text/plain", format!("Event tickets paid to {}", self.config.receiver)],
            ["text/identifier", format!("{}@{}", self.config.receiver.local_part(), self.config.receiver.domain())],
        ])
        .to_string();

        Some(PayableParameters {
            tag: PAY_REQUEST_TAG.to_string(),
            callback: self.config.amount_callback_url(),
            min_sendable: self.config.min_sendable_msats,
            max_sendable: self.config.max_sendable_msats,
            metadata,
            currencies: vec![self.sat_currency()],
            uma_version: self
                .config
                .supported_versions
                .iter()
                .map(|major| format!("{major}.0"))
                .collect::<Vec<_>>()
                .join(","),
        })
    }

    /// Our provider configuration document
    #[must_use]
    pub fn uma_configuration(&self) -> UmaConfiguration {
        UmaConfiguration {
            uma_major_versions: self.config.supported_versions.clone(),
            uma_request_endpoint: None,
        }
    }

    // ========================================================================
    // Pull callback
    // ========================================================================

    /// Hand the counterparty the invoice already issued for `ticket_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] envelope when the ticket has no pending
    /// payment. Envelope construction failures degrade to a bare response.
    pub async fn pay_request(
        &self,
        ticket_id: TicketId,
        body: &PayRequestBody,
    ) -> Result<PayRequestResponse, ProtocolError> {
        let payment = self
            .store
            .payment_for_ticket(ticket_id)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| ProtocolError::new(format!("no payment for ticket {ticket_id}")))?;

        if payment.status != PaymentStatus::Pending {
            return Err(ProtocolError::new(format!(
                "payment for ticket {ticket_id} is {}",
                payment.status
            )));
        }

        let encoded = self.current_invoice(&payment).await?;

        let PayRequestBody::Uma(request) = body else {
            return Ok(PayRequestResponse::bare(encoded));
        };

        if let Some(callback) = request.utxo_callback() {
            if let Err(error) = self.store.record_counterparty_callback(payment.id, callback).await {
                tracing::warn!(%ticket_id, %error, "Could not record counterparty callback");
            }
        }

        match self.envelope(request, &payment) {
            Ok(uma) => Ok(PayRequestResponse {
                pr: encoded,
                routes: Vec::new(),
                uma: Some(uma),
            }),
            Err(error) => {
                tracing::warn!(%ticket_id, %error, "Falling back to bare pay response");
                Ok(PayRequestResponse::bare(encoded))
            },
        }
    }

    /// Deprecated amount-only lookup: the oldest pending payment for exactly
    /// `amount_msats`. Ambiguous when several tickets share a price.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] envelope when no amount is given, the amount
    /// is not whole satoshis, or nothing matches.
    pub async fn pay_by_amount(&self, amount_msats: Option<u64>) -> Result<PayRequestResponse, ProtocolError> {
        let amount_msats = amount_msats.ok_or_else(|| ProtocolError::new("amount is required"))?;
        let amount = Sats::from_millisats(amount_msats)
            .ok_or_else(|| ProtocolError::new("amount must be whole satoshis"))?;

        tracing::warn!(%amount, "Amount-based invoice lookup used; prefer the per-ticket callback");

        let payment = self
            .store
            .oldest_pending_payment_with_amount(amount)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| ProtocolError::new(format!("no pending payment for {amount}")))?;

        let encoded = self.current_invoice(&payment).await?;
        Ok(PayRequestResponse::bare(encoded))
    }

    async fn current_invoice(&self, payment: &Payment) -> Result<String, ProtocolError> {
        let invoice = self
            .store
            .invoice_for_ticket(payment.ticket_id)
            .await
            .map_err(unavailable)?;

        match invoice {
            Some(invoice) if invoice.is_expired(self.clock.now()) => {
                Err(ProtocolError::new("invoice expired"))
            },
            Some(invoice) => Ok(invoice.encoded),
            None => Ok(payment.invoice.clone()),
        }
    }

    fn envelope(&self, request: &UmaPayRequest, payment: &Payment) -> Result<UmaEnvelope, EnvelopeError> {
        if !request.receiving_currency_code.eq_ignore_ascii_case("SAT") {
            return Err(EnvelopeError::UnsupportedCurrency(
                request.receiving_currency_code.clone(),
            ));
        }
        let requested = request
            .uma_major_version
            .unwrap_or_else(|| self.config.supported_versions.first().copied().unwrap_or(1));
        let version = negotiate_version(&self.config.supported_versions, &[requested])
            .ok_or(EnvelopeError::UnsupportedVersion(requested))?;

        Ok(UmaEnvelope {
            converted: ConvertedAmount {
                amount: payment.amount.get(),
                currency_code: "SAT".to_string(),
                decimals: 0,
                multiplier: MSATS_PER_SAT,
                fee: 0,
            },
            payee_data: json!({ "identifier": self.config.receiver.to_string() }),
            uma_major_version: version,
            disposable: false,
        })
    }
}

fn unavailable(error: StoreError) -> ProtocolError {
    tracing::error!(%error, "Store unavailable while answering pay request");
    ProtocolError::new("temporarily unavailable")
}
