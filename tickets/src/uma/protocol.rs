//! Wire types for the LNURL/UMA exchanges.
//!
//! Field names follow the protocol documents, which mix camelCase (LNURL) and
//! snake_case (UMA configuration), so each struct declares its own casing.

use serde::{Deserialize, Serialize};

/// LNURL `tag` for pay requests
pub const PAY_REQUEST_TAG: &str = "payRequest";

/// Envelope status for protocol-level failures
pub const STATUS_ERROR: &str = "ERROR";

/// A currency the receiver can quote amounts in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    /// ISO-ish code, `SAT` for satoshis
    pub code: String,
    /// Display name
    pub name: String,
    /// Display symbol
    pub symbol: String,
    /// Millisatoshis per smallest unit of this currency
    pub multiplier: f64,
    /// Decimal places of the smallest unit
    pub decimals: u8,
    /// Minimum payable, in the smallest unit
    pub min_sendable: u64,
    /// Maximum payable, in the smallest unit
    pub max_sendable: u64,
}

/// Discovery document served at `/.well-known/lnurlp/{username}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayableParameters {
    /// Always [`PAY_REQUEST_TAG`]
    pub tag: String,
    /// Where counterparties send pay requests
    pub callback: String,
    /// Minimum payable, in millisatoshis
    pub min_sendable: u64,
    /// Maximum payable, in millisatoshis
    pub max_sendable: u64,
    /// LNURL metadata (JSON-encoded array of `[mime, value]` pairs)
    pub metadata: String,
    /// Currencies amounts can be quoted in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub currencies: Vec<Currency>,
    /// Supported UMA versions, highest first, comma separated (e.g. `1.0,0.3`)
    pub uma_version: String,
}

/// Provider configuration served at `/.well-known/uma-configuration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmaConfiguration {
    /// Supported UMA protocol major versions
    pub uma_major_versions: Vec<u32>,
    /// Endpoint accepting pushed payment requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uma_request_endpoint: Option<String>,
}

/// Body of a counterparty pull request for an invoice.
///
/// A full UMA pay request names the receiving currency and carries payer data;
/// anything else is treated as a bare LNURL amount query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PayRequestBody {
    /// Full UMA pay request
    Uma(UmaPayRequest),
    /// Bare amount query
    Amount(AmountQuery),
}

/// Full UMA pay request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UmaPayRequest {
    /// Amount in millisatoshis
    pub amount: u64,
    /// Currency the receiver should quote in
    pub receiving_currency_code: String,
    /// Payer identity and compliance data
    pub payer_data: serde_json::Value,
    /// Protocol major version the sender speaks
    #[serde(default)]
    pub uma_major_version: Option<u32>,
}

impl UmaPayRequest {
    /// Post-transaction callback the sender asked to be notified at
    #[must_use]
    pub fn utxo_callback(&self) -> Option<&str> {
        self.payer_data
            .get("compliance")
            .and_then(|compliance| compliance.get("utxoCallback"))
            .and_then(serde_json::Value::as_str)
            .filter(|url| !url.is_empty())
    }
}

/// Bare LNURL amount query
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AmountQuery {
    /// Amount in millisatoshis
    #[serde(default)]
    pub amount: Option<u64>,
}

/// Amount quoted in the receiving currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedAmount {
    /// Amount in the smallest unit of `currency_code`
    pub amount: u64,
    /// Currency code
    pub currency_code: String,
    /// Decimal places of the smallest unit
    pub decimals: u8,
    /// Millisatoshis per smallest unit
    pub multiplier: f64,
    /// Receiver fee in millisatoshis
    pub fee: u64,
}

/// Richer UMA fields added to a pull response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UmaEnvelope {
    /// Quote in the receiving currency
    pub converted: ConvertedAmount,
    /// Receiver-side identity data
    pub payee_data: serde_json::Value,
    /// Negotiated protocol major version
    pub uma_major_version: u32,
    /// Whether the invoice is single-use from the wallet's perspective
    pub disposable: bool,
}

/// Successful pull response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayRequestResponse {
    /// Encoded payment request
    pub pr: String,
    /// Route hints; always empty
    pub routes: Vec<serde_json::Value>,
    /// Present when answering a full UMA pay request
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub uma: Option<UmaEnvelope>,
}

impl PayRequestResponse {
    /// Bare `{pr, routes: []}` response
    #[must_use]
    pub const fn bare(pr: String) -> Self {
        Self {
            pr,
            routes: Vec::new(),
            uma: None,
        }
    }
}

/// Protocol error envelope, always sent with HTTP 200
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Always [`STATUS_ERROR`]
    pub status: String,
    /// Human-readable reason
    pub reason: String,
}

impl ProtocolError {
    /// Build an error envelope
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            reason: reason.into(),
        }
    }
}

/// Payment request pushed to a buyer's provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequestPush {
    /// Buyer being asked to pay
    pub sender_uma: String,
    /// Address receiving the payment
    pub receiver_uma: String,
    /// Amount in satoshis
    pub amount: u64,
    /// Currency of `amount`
    pub currency: String,
    /// Pull callback unique to the ticket
    pub callback: String,
    /// Unix seconds after which the request is void
    pub expires_at: i64,
    /// Shown to the buyer
    pub description: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_uma_body_is_recognised() {
        let body: PayRequestBody = serde_json::from_value(json!({
            "amount": 21000,
            "receivingCurrencyCode": "SAT",
            "payerData": {
                "identifier": "$alice@wallet.example",
                "compliance": { "utxoCallback": "https://wallet.example/utxo" }
            },
            "umaMajorVersion": 1
        }))
        .unwrap();

        let PayRequestBody::Uma(request) = body else {
            panic!("expected a full UMA pay request");
        };
        assert_eq!(request.amount, 21_000);
        assert_eq!(request.utxo_callback(), Some("https://wallet.example/utxo"));
    }

    #[test]
    fn test_bare_amount_body() {
        let body: PayRequestBody = serde_json::from_value(json!({ "amount": 5000 })).unwrap();
        assert_eq!(body, PayRequestBody::Amount(AmountQuery { amount: Some(5000) }));

        let empty: PayRequestBody = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, PayRequestBody::Amount(AmountQuery::default()));
    }

    #[test]
    fn test_bare_response_shape() {
        let value = serde_json::to_value(PayRequestResponse::bare("lnbc1".to_string())).unwrap();
        assert_eq!(value, json!({ "pr": "lnbc1", "routes": [] }));
    }

    #[test]
    fn test_error_envelope_shape() {
        let value = serde_json::to_value(ProtocolError::new("not pending")).unwrap();
        assert_eq!(value, json!({ "status": "ERROR", "reason": "not pending" }));
    }
}
