//! HTTP API handlers.

pub mod error;
pub mod payments;
pub mod tickets;
pub mod uma;
pub mod wallets;
pub mod webhooks;

pub use error::AppError;
