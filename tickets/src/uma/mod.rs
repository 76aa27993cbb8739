//! Universal Money Address support: address grammar, protocol wire types and
//! the outbound client for counterparty providers.

pub mod address;
pub mod client;
pub mod protocol;

pub use address::{AddressError, UmaAddress};
pub use client::{
    HttpUmaClient, SettlementNotice, SettlementNotifier, UMA_CONFIGURATION_PATH, UmaClient,
    UmaClientError,
};
pub use protocol::{
    AmountQuery, ConvertedAmount, Currency, PAY_REQUEST_TAG, PayRequestBody, PayRequestResponse,
    PayableParameters, PaymentRequestPush, ProtocolError, STATUS_ERROR, UmaConfiguration,
    UmaEnvelope, UmaPayRequest,
};
