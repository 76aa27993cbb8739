//! Outbound calls to counterparty UMA providers.
//!
//! - [`UmaClient`] discovers a buyer's provider and pushes payment requests to it
//! - [`SettlementNotifier`] sends the post-settlement callback a sender asked for

use super::protocol::{PaymentRequestPush, UmaConfiguration};
use crate::lightning::http::error_excerpt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Path of the provider configuration document
pub const UMA_CONFIGURATION_PATH: &str = "/.well-known/uma-configuration";

/// Errors talking to a counterparty provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UmaClientError {
    /// Network failure or timeout
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// Provider answered with a non-success status
    #[error("provider rejected request with status {status}: {body}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Provider does not accept pushed payment requests
    #[error("provider at {0} has no request endpoint")]
    NoRequestEndpoint(String),

    /// No protocol major version in common
    #[error("provider supports none of our protocol versions (offers {0:?})")]
    UnsupportedVersion(Vec<u32>),

    /// Response body did not parse
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Discovery and push toward a buyer's provider.
#[async_trait]
pub trait UmaClient: Send + Sync {
    /// Fetch the provider configuration for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`UmaClientError`] if the provider cannot be reached or answers
    /// with something other than a configuration document.
    async fn discover(&self, domain: &str) -> Result<UmaConfiguration, UmaClientError>;

    /// Deliver a payment request to the provider's request endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`UmaClientError`] if delivery fails or is rejected.
    async fn push_request(
        &self,
        endpoint: &str,
        request: &PaymentRequestPush,
    ) -> Result<(), UmaClientError>;
}

/// Body of the post-settlement callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementNotice {
    /// Our provider domain
    pub vasp_domain: String,
    /// Settled payment request
    pub invoice: String,
    /// Settled amount in millisatoshis
    pub amount_msats: u64,
    /// When we reconciled the settlement
    pub settled_at: DateTime<Utc>,
}

/// Best-effort notification of a settled payment.
#[async_trait]
pub trait SettlementNotifier: Send + Sync {
    /// Post `notice` to `callback_url`.
    ///
    /// # Errors
    ///
    /// Returns [`UmaClientError`] if delivery fails; callers log and move on.
    async fn notify(&self, callback_url: &str, notice: &SettlementNotice)
        -> Result<(), UmaClientError>;
}

/// reqwest-backed client for both directions
#[derive(Clone, Debug)]
pub struct HttpUmaClient {
    http: reqwest::Client,
    scheme: String,
}

impl HttpUmaClient {
    /// Create a client. `scheme` is `https` in production; `http` lets local
    /// providers on `localhost:port` be exercised.
    ///
    /// # Errors
    ///
    /// Returns [`UmaClientError::Unreachable`] if the HTTP client cannot be built.
    pub fn new(scheme: impl Into<String>, timeout: Duration) -> Result<Self, UmaClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UmaClientError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            scheme: scheme.into(),
        })
    }

    fn configuration_url(&self, domain: &str) -> String {
        format!("{}://{domain}{UMA_CONFIGURATION_PATH}", self.scheme)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, UmaClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = error_excerpt(response.text().await.unwrap_or_default());
        Err(UmaClientError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn transport_error(error: &reqwest::Error) -> UmaClientError {
    UmaClientError::Unreachable(error.to_string())
}

#[async_trait]
impl UmaClient for HttpUmaClient {
    async fn discover(&self, domain: &str) -> Result<UmaConfiguration, UmaClientError> {
        let url = self.configuration_url(domain);
        tracing::debug!(%url, "Fetching provider configuration");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let response = Self::ensure_success(response).await?;

        response
            .json::<UmaConfiguration>()
            .await
            .map_err(|e| UmaClientError::InvalidResponse(e.to_string()))
    }

    async fn push_request(
        &self,
        endpoint: &str,
        request: &PaymentRequestPush,
    ) -> Result<(), UmaClientError> {
        let response = self
            .http
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl SettlementNotifier for HttpUmaClient {
    async fn notify(
        &self,
        callback_url: &str,
        notice: &SettlementNotice,
    ) -> Result<(), UmaClientError> {
        let response = self
            .http
            .post(callback_url)
            .json(notice)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejection_with_multibyte_body_is_an_error() {
        let body = format!("{}{}", "a".repeat(511), "é".repeat(50));
        let response = reqwest::Response::from(
            axum::http::Response::builder()
                .status(400)
                .body(body)
                .unwrap(),
        );

        match HttpUmaClient::ensure_success(response).await {
            Err(UmaClientError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "a".repeat(511));
            },
            other => panic!("expected rejection, got {:?}", other.map(|r| r.status())),
        }
    }

    #[test]
    fn test_configuration_url_uses_scheme() {
        let client = HttpUmaClient::new("http", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.configuration_url("localhost:9000"),
            "http://localhost:9000/.well-known/uma-configuration"
        );
    }

    #[test]
    fn test_settlement_notice_is_camel_case() {
        let notice = SettlementNotice {
            vasp_domain: "tickets.example".to_string(),
            invoice: "lnbc1".to_string(),
            amount_msats: 1000,
            settled_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        let value = serde_json::to_value(notice).unwrap();
        assert_eq!(value["vaspDomain"], "tickets.example");
        assert_eq!(value["amountMsats"], 1000);
    }
}
