//! Lightning payment processor abstraction.
//!
//! The processor issues invoices and, when a payment finishes, is queried for
//! the settlement entity a webhook refers to. Invoice encoding and node
//! operations stay on the processor side.

use crate::types::Sats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Processor result
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Processor errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// Network failure, timeout or 5xx
    #[error("payment processor unavailable: {0}")]
    Unavailable(String),

    /// Request refused by the processor
    #[error("payment processor rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Referenced entity does not exist
    #[error("processor entity {0} not found")]
    NotFound(String),

    /// Response did not have the expected shape
    #[error("invalid processor response: {0}")]
    InvalidResponse(String),
}

/// Invoice parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSpec {
    /// Amount to request
    pub amount: Sats,
    /// Description embedded in the invoice
    pub description: String,
    /// How long the invoice stays payable
    pub expiry: Duration,
}

/// Invoice as returned by the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorInvoice {
    /// Processor-side ID
    pub id: String,
    /// Payment hash
    #[serde(default)]
    pub payment_hash: String,
    /// Encoded payment request
    pub encoded_payment_request: String,
    /// Amount in millisatoshis
    #[serde(default)]
    pub amount_msats: u64,
    /// Expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Payment request data embedded in an outgoing payment.
///
/// Processors have returned this inline, behind a `data` wrapper that may be
/// null, and as a bare encoded string; all three are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddedPaymentRequest {
    /// Inline request data
    Value(PaymentRequestData),
    /// Wrapped request data
    Reference {
        /// Possibly absent request data
        data: Option<Box<PaymentRequestData>>,
    },
    /// Bare encoded string
    Encoded(String),
}

/// Minimal payment request data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequestData {
    /// Encoded payment request
    pub encoded_payment_request: String,
}

impl EmbeddedPaymentRequest {
    /// The encoded payment request, if the representation carries one
    #[must_use]
    pub fn encoded(&self) -> Option<&str> {
        let encoded = match self {
            Self::Value(data) => data.encoded_payment_request.as_str(),
            Self::Reference { data } => data.as_deref()?.encoded_payment_request.as_str(),
            Self::Encoded(encoded) => encoded.as_str(),
        };
        (!encoded.is_empty()).then_some(encoded)
    }
}

/// A finished payment as reported by the processor.
///
/// Resolved once at the reconciliation boundary; nothing downstream inspects
/// raw processor JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementEntity {
    /// Someone paid an invoice we issued
    IncomingPayment {
        /// Entity ID
        id: String,
        /// Invoice that was paid
        invoice_id: String,
    },
    /// We paid an invoice (self-pay shape kept for compatibility)
    OutgoingPayment {
        /// Entity ID
        id: String,
        /// Embedded request data, when present
        #[serde(default)]
        payment_request_data: Option<EmbeddedPaymentRequest>,
    },
}

/// Lightning payment processor
#[async_trait]
pub trait LightningProcessor: Send + Sync {
    /// Create an invoice.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] if the processor cannot issue the invoice.
    async fn create_invoice(&self, spec: &InvoiceSpec) -> ProcessorResult<ProcessorInvoice>;

    /// Fetch the settlement entity a webhook refers to.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] if the entity cannot be fetched or parsed.
    async fn fetch_settlement(&self, entity_id: &str) -> ProcessorResult<SettlementEntity>;

    /// Fetch an invoice by processor ID.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] if the invoice cannot be fetched.
    async fn fetch_invoice(&self, invoice_id: &str) -> ProcessorResult<ProcessorInvoice>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_incoming_entity_shape() {
        let entity: SettlementEntity = serde_json::from_value(json!({
            "type": "incoming_payment",
            "id": "pay_1",
            "invoice_id": "inv_1"
        }))
        .unwrap();
        assert_eq!(
            entity,
            SettlementEntity::IncomingPayment {
                id: "pay_1".to_string(),
                invoice_id: "inv_1".to_string()
            }
        );
    }

    #[test]
    fn test_outgoing_entity_accepts_all_embeddings() {
        for embedded in [
            json!({ "encoded_payment_request": "lnbc1abc" }),
            json!({ "data": { "encoded_payment_request": "lnbc1abc" } }),
            json!("lnbc1abc"),
        ] {
            let entity: SettlementEntity = serde_json::from_value(json!({
                "type": "outgoing_payment",
                "id": "pay_2",
                "payment_request_data": embedded
            }))
            .unwrap();
            let SettlementEntity::OutgoingPayment {
                payment_request_data: Some(data),
                ..
            } = entity
            else {
                unreachable!("outgoing entity with data");
            };
            assert_eq!(data.encoded(), Some("lnbc1abc"));
        }
    }

    #[test]
    fn test_outgoing_entity_without_data() {
        let null_wrapper: EmbeddedPaymentRequest =
            serde_json::from_value(json!({ "data": null })).unwrap();
        assert_eq!(null_wrapper.encoded(), None);

        let empty: EmbeddedPaymentRequest = serde_json::from_value(json!("")).unwrap();
        assert_eq!(empty.encoded(), None);
    }
}
