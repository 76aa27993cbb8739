//! In-process collaborators for development mode and tests.
//!
//! `LIGHTNING_BACKEND=mock` wires these in place of the HTTP clients so the
//! server runs without a processor, wallet bridge or counterparty provider.

use crate::lightning::{
    EmbeddedPaymentRequest, InvoiceSpec, LightningProcessor, PaymentRequestData, ProcessorError,
    ProcessorInvoice, ProcessorResult, SettlementEntity, WalletConnector, WalletError,
    WalletReceipt,
};
use crate::types::WalletCredential;
use crate::uma::{
    PaymentRequestPush, SettlementNotice, SettlementNotifier, UmaClient, UmaClientError,
    UmaConfiguration,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Lightning processor
// ============================================================================

#[derive(Default)]
struct ProcessorState {
    invoices: HashMap<String, ProcessorInvoice>,
    entities: HashMap<String, SettlementEntity>,
    issued: u64,
    fail_next: bool,
}

/// Processor issuing deterministic `lnbcrt...` invoices
#[derive(Default)]
pub struct MockLightningProcessor {
    state: Mutex<ProcessorState>,
}

impl MockLightningProcessor {
    /// Creates a new mock processor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next `create_invoice` fail as unavailable
    pub fn fail_next_invoice(&self) {
        lock(&self.state).fail_next = true;
    }

    /// Number of invoices issued
    #[must_use]
    pub fn issued_count(&self) -> u64 {
        lock(&self.state).issued
    }

    /// Record an incoming payment of the invoice `encoded`; returns the entity ID
    /// a webhook would reference, or `None` if no such invoice was issued.
    #[must_use]
    pub fn settle_incoming(&self, encoded: &str) -> Option<String> {
        let mut state = lock(&self.state);
        let invoice_id = state
            .invoices
            .values()
            .find(|invoice| invoice.encoded_payment_request == encoded)?
            .id
            .clone();
        let id = format!("mock-in-{}", state.entities.len() + 1);
        state.entities.insert(
            id.clone(),
            SettlementEntity::IncomingPayment {
                id: id.clone(),
                invoice_id,
            },
        );
        Some(id)
    }

    /// Record an outgoing payment embedding `encoded`; returns the entity ID
    #[must_use]
    pub fn settle_outgoing(&self, encoded: &str) -> String {
        let mut state = lock(&self.state);
        let id = format!("mock-out-{}", state.entities.len() + 1);
        state.entities.insert(
            id.clone(),
            SettlementEntity::OutgoingPayment {
                id: id.clone(),
                payment_request_data: Some(EmbeddedPaymentRequest::Value(PaymentRequestData {
                    encoded_payment_request: encoded.to_string(),
                })),
            },
        );
        id
    }
}

#[async_trait]
impl LightningProcessor for MockLightningProcessor {
    async fn create_invoice(&self, spec: &InvoiceSpec) -> ProcessorResult<ProcessorInvoice> {
        let mut state = lock(&self.state);
        if std::mem::take(&mut state.fail_next) {
            return Err(ProcessorError::Unavailable("mock processor offline".to_string()));
        }
        state.issued += 1;
        let n = state.issued;
        let invoice = ProcessorInvoice {
            id: format!("mock-inv-{n}"),
            payment_hash: format!("{n:064x}"),
            encoded_payment_request: format!("lnbcrt{}n1pmock{n:010}", spec.amount.get()),
            amount_msats: spec.amount.millisats(),
            expires_at: None,
        };
        state.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(invoice)
    }

    async fn fetch_settlement(&self, entity_id: &str) -> ProcessorResult<SettlementEntity> {
        lock(&self.state)
            .entities
            .get(entity_id)
            .cloned()
            .ok_or_else(|| ProcessorError::NotFound(entity_id.to_string()))
    }

    async fn fetch_invoice(&self, invoice_id: &str) -> ProcessorResult<ProcessorInvoice> {
        lock(&self.state)
            .invoices
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| ProcessorError::NotFound(invoice_id.to_string()))
    }
}

// ============================================================================
// Wallet
// ============================================================================

/// Wallet connector recording every invoice it is asked to pay
#[derive(Default)]
pub struct MockWalletConnector {
    decline: Option<String>,
    attempts: Mutex<Vec<String>>,
}

impl MockWalletConnector {
    /// Connector that accepts every payment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that declines every payment with `reason`
    #[must_use]
    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            decline: Some(reason.into()),
            attempts: Mutex::default(),
        }
    }

    /// Invoices the wallet was asked to pay
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl WalletConnector for MockWalletConnector {
    async fn pay_invoice(
        &self,
        _credential: &WalletCredential,
        invoice: &str,
    ) -> Result<WalletReceipt, WalletError> {
        lock(&self.attempts).push(invoice.to_string());
        match &self.decline {
            Some(reason) => Err(WalletError::Declined(reason.clone())),
            None => Ok(WalletReceipt { preimage: None }),
        }
    }
}

// ============================================================================
// Counterparty provider
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ProviderBehaviour {
    #[default]
    Accepting,
    Unreachable,
    Rejecting,
}

/// Provider that speaks UMA v1 and records pushed requests
#[derive(Default)]
pub struct MockUmaClient {
    behaviour: ProviderBehaviour,
    pushed: Mutex<Vec<PaymentRequestPush>>,
    discovered: Mutex<Vec<String>>,
}

impl MockUmaClient {
    /// Provider accepting every request
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose discovery fails
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            behaviour: ProviderBehaviour::Unreachable,
            ..Self::default()
        }
    }

    /// Provider that rejects pushed requests
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            behaviour: ProviderBehaviour::Rejecting,
            ..Self::default()
        }
    }

    /// Requests delivered so far
    #[must_use]
    pub fn pushed(&self) -> Vec<PaymentRequestPush> {
        lock(&self.pushed).clone()
    }

    /// Domains discovery was attempted for
    #[must_use]
    pub fn discovered(&self) -> Vec<String> {
        lock(&self.discovered).clone()
    }
}

#[async_trait]
impl UmaClient for MockUmaClient {
    async fn discover(&self, domain: &str) -> Result<UmaConfiguration, UmaClientError> {
        lock(&self.discovered).push(domain.to_string());
        if self.behaviour == ProviderBehaviour::Unreachable {
            return Err(UmaClientError::Unreachable(format!("{domain}: connection refused")));
        }
        Ok(UmaConfiguration {
            uma_major_versions: vec![1, 0],
            uma_request_endpoint: Some(format!("https://{domain}/api/uma/request")),
        })
    }

    async fn push_request(
        &self,
        _endpoint: &str,
        request: &PaymentRequestPush,
    ) -> Result<(), UmaClientError> {
        if self.behaviour == ProviderBehaviour::Rejecting {
            return Err(UmaClientError::Rejected {
                status: 400,
                body: "unknown receiver".to_string(),
            });
        }
        lock(&self.pushed).push(request.clone());
        Ok(())
    }
}

// ============================================================================
// Settlement notifier
// ============================================================================

/// Notifier recording every post-settlement callback
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    notices: Mutex<Vec<(String, SettlementNotice)>>,
}

impl RecordingNotifier {
    /// Notifier that always delivers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose deliveries always fail
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(callback_url, notice)` pairs delivered or attempted
    #[must_use]
    pub fn notices(&self) -> Vec<(String, SettlementNotice)> {
        lock(&self.notices).clone()
    }
}

#[async_trait]
impl SettlementNotifier for RecordingNotifier {
    async fn notify(
        &self,
        callback_url: &str,
        notice: &SettlementNotice,
    ) -> Result<(), UmaClientError> {
        lock(&self.notices).push((callback_url.to_string(), notice.clone()));
        if self.fail {
            return Err(UmaClientError::Unreachable(callback_url.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Sats;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_invoices_are_unique_and_resolvable() {
        let processor = MockLightningProcessor::new();
        let spec = InvoiceSpec {
            amount: Sats::new(500),
            description: "Ticket".to_string(),
            expiry: Duration::from_secs(60),
        };
        let first = processor.create_invoice(&spec).await.unwrap();
        let second = processor.create_invoice(&spec).await.unwrap();
        assert_ne!(first.encoded_payment_request, second.encoded_payment_request);

        let entity_id = processor
            .settle_incoming(&first.encoded_payment_request)
            .unwrap();
        let SettlementEntity::IncomingPayment { invoice_id, .. } =
            processor.fetch_settlement(&entity_id).await.unwrap()
        else {
            unreachable!("incoming entity");
        };
        assert_eq!(invoice_id, first.id);
        assert!(processor.settle_incoming("lnbc-unknown").is_none());
    }
}
