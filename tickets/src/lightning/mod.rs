//! Lightning collaborators: the invoice-issuing processor and buyer wallets.

pub mod http;
pub mod processor;
pub mod wallet;

pub use http::HttpLightningProcessor;
pub use processor::{
    EmbeddedPaymentRequest, InvoiceSpec, LightningProcessor, PaymentRequestData, ProcessorError,
    ProcessorInvoice, ProcessorResult, SettlementEntity,
};
pub use wallet::{HttpWalletConnector, WalletConnector, WalletError, WalletReceipt};
