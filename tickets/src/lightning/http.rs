//! HTTP client for the hosted Lightning processor.
//!
//! Endpoints (relative to the configured base URL, bearer-token authenticated):
//! - `POST /v1/invoices` - create an invoice
//! - `GET /v1/invoices/{id}` - fetch an invoice
//! - `GET /v1/entities/{id}` - fetch a payment entity named by a webhook

use super::processor::{
    InvoiceSpec, LightningProcessor, ProcessorError, ProcessorInvoice, ProcessorResult,
    SettlementEntity,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest error body kept from a rejected response, in bytes
const ERROR_BODY_LIMIT: usize = 512;

/// Cut an error body to [`ERROR_BODY_LIMIT`] bytes on a character boundary.
pub(crate) fn error_excerpt(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[derive(Debug, Serialize)]
struct CreateInvoiceRequest<'a> {
    amount_msats: u64,
    memo: &'a str,
    expiry_secs: u64,
}

/// reqwest-backed [`LightningProcessor`]
#[derive(Clone, Debug)]
pub struct HttpLightningProcessor {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpLightningProcessor {
    /// Create a processor client
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> ProcessorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessorError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
        entity: &str,
    ) -> ProcessorResult<T> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProcessorError::NotFound(entity.to_string()));
        }
        if status.is_server_error() {
            return Err(ProcessorError::Unavailable(format!("processor returned {status}")));
        }
        if !status.is_success() {
            let body = error_excerpt(response.text().await.unwrap_or_default());
            return Err(ProcessorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, entity: &str) -> ProcessorResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProcessorError::Unavailable(e.to_string()))?;
        Self::read(response, entity).await
    }
}

#[async_trait]
impl LightningProcessor for HttpLightningProcessor {
    async fn create_invoice(&self, spec: &InvoiceSpec) -> ProcessorResult<ProcessorInvoice> {
        let body = CreateInvoiceRequest {
            amount_msats: spec.amount.millisats(),
            memo: &spec.description,
            expiry_secs: spec.expiry.as_secs(),
        };
        let response = self
            .http
            .post(self.url("/v1/invoices"))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProcessorError::Unavailable(e.to_string()))?;

        let invoice: ProcessorInvoice = Self::read(response, "invoice").await?;
        if invoice.encoded_payment_request.is_empty() {
            return Err(ProcessorError::InvalidResponse(
                "invoice without encoded payment request".to_string(),
            ));
        }
        Ok(invoice)
    }

    async fn fetch_settlement(&self, entity_id: &str) -> ProcessorResult<SettlementEntity> {
        self.get(&format!("/v1/entities/{entity_id}"), entity_id).await
    }

    async fn fetch_invoice(&self, invoice_id: &str) -> ProcessorResult<ProcessorInvoice> {
        self.get(&format!("/v1/invoices/{invoice_id}"), invoice_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn rejected(body: String) -> reqwest::Response {
        reqwest::Response::from(
            axum::http::Response::builder()
                .status(400)
                .body(body)
                .unwrap(),
        )
    }

    #[test]
    fn test_error_excerpt_stops_on_char_boundary() {
        let body = format!("{}{}", "a".repeat(511), "é".repeat(50));
        let excerpt = error_excerpt(body);
        assert_eq!(excerpt.len(), 511);
        assert!(excerpt.chars().all(|c| c == 'a'));

        assert_eq!(error_excerpt("short".to_string()), "short");
    }

    #[tokio::test]
    async fn test_rejected_multibyte_body_is_reported() {
        let body = format!("{}{}", "a".repeat(511), "é".repeat(50));
        let result = HttpLightningProcessor::read::<serde_json::Value>(rejected(body), "inv_1").await;

        match result {
            Err(ProcessorError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.len() <= ERROR_BODY_LIMIT);
            },
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let processor =
            HttpLightningProcessor::new("https://api.processor.example/", "token", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            processor.url("/v1/invoices"),
            "https://api.processor.example/v1/invoices"
        );
    }

    #[test]
    fn test_create_invoice_body_uses_millisats() {
        let body = CreateInvoiceRequest {
            amount_msats: crate::types::Sats::new(2_100).millisats(),
            memo: "Ticket",
            expiry_secs: 600,
        };
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value["amount_msats"], 2_100_000);
        assert_eq!(value["expiry_secs"], 600);
    }
}
