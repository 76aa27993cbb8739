//! Paying invoices through a buyer's stored wallet connection.

use crate::types::WalletCredential;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Wallet payment failure. Always recoverable by falling back to a push.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// Bridge or wallet unreachable
    #[error("wallet unreachable: {0}")]
    Unreachable(String),

    /// Wallet refused to pay (budget, balance, revoked connection)
    #[error("wallet declined payment: {0}")]
    Declined(String),
}

/// Proof the wallet accepted the payment instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletReceipt {
    /// Payment preimage, when the wallet reports one
    #[serde(default)]
    pub preimage: Option<String>,
}

/// Instructs a connected wallet to pay an invoice.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Pay `invoice` using `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError`] if the wallet cannot be reached or declines.
    async fn pay_invoice(
        &self,
        credential: &WalletCredential,
        invoice: &str,
    ) -> Result<WalletReceipt, WalletError>;
}

#[derive(Serialize)]
struct PayInvoiceRequest<'a> {
    connection_uri: &'a str,
    invoice: &'a str,
}

#[derive(Deserialize)]
struct BridgeError {
    #[serde(default)]
    error: String,
}

/// Wallet connector speaking to a wallet-connect HTTP bridge.
///
/// The bridge holds the relay connection; this client posts the stored
/// connection URI and the invoice to `{bridge_url}/pay_invoice`.
#[derive(Clone, Debug)]
pub struct HttpWalletConnector {
    http: reqwest::Client,
    bridge_url: String,
}

impl HttpWalletConnector {
    /// Create a connector
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Unreachable`] if the HTTP client cannot be built.
    pub fn new(bridge_url: impl Into<String>, timeout: Duration) -> Result<Self, WalletError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Unreachable(e.to_string()))?;
        Ok(Self {
            http,
            bridge_url: bridge_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WalletConnector for HttpWalletConnector {
    async fn pay_invoice(
        &self,
        credential: &WalletCredential,
        invoice: &str,
    ) -> Result<WalletReceipt, WalletError> {
        let response = self
            .http
            .post(format!("{}/pay_invoice", self.bridge_url))
            .json(&PayInvoiceRequest {
                connection_uri: &credential.connection_uri,
                invoice,
            })
            .send()
            .await
            .map_err(|e| WalletError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(WalletError::Unreachable(format!("bridge returned {status}")));
        }
        if !status.is_success() {
            let reason = response
                .json::<BridgeError>()
                .await
                .map(|e| e.error)
                .unwrap_or_default();
            return Err(WalletError::Declined(if reason.is_empty() {
                status.to_string()
            } else {
                reason
            }));
        }

        response
            .json::<WalletReceipt>()
            .await
            .map_err(|e| WalletError::Unreachable(format!("invalid bridge response: {e}")))
    }
}
