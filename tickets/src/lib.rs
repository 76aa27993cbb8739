//! UMA ticket sales over Lightning.
//!
//! Buyers pay for tickets with Lightning wallets addressed by a Universal
//! Money Address (`$alice@wallet.example`). The hard part is not the CRUD
//! surface but the payment core:
//!
//! ```text
//! purchase ─► capacity ─► issuer ─► store (pending) ─► router (background)
//!                                                        │
//!                              ┌─────────────────────────┴───────┐
//!                              ▼                                 ▼
//!                     stored wallet pays            push request to buyer's
//!                                                   provider ─► pull callback
//!                              │                                 │
//!                              └──────────► processor ◄──────────┘
//!                                              │ signed webhook
//!                                              ▼
//!                                  reconciler ─► store (paid)
//! ```
//!
//! # Payment lifecycle
//!
//! Every status change goes through [`lifecycle::LifecycleReducer`], a pure
//! reducer whose side effects (wallet pay, provider discovery and push) are
//! returned as [`uma_tickets_core::effect::Effect`] values and executed by
//! [`router::LifecycleRunner`]. Persisted transitions are guarded by the
//! expected source status, so concurrent writers cannot move a payment twice:
//!
//! ```text
//! pending ──settlement──► paid
//! pending ──push failed─► failed   ──retry──► pending
//! pending ──expiry──────► expired  ──retry──► pending
//! ```
//!
//! Free events never enter the machine; their tickets are created `free`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod bootstrap;
pub mod capacity;
pub mod config;
pub mod expiry;
pub mod issuer;
pub mod lifecycle;
pub mod lightning;
pub mod metrics;
pub mod mocks;
pub mod purchase;
pub mod reconciler;
pub mod responder;
pub mod router;
pub mod runtime;
pub mod server;
pub mod store;
pub mod types;
pub mod uma;

pub use bootstrap::ApplicationBuilder;
pub use config::Config;
pub use purchase::{PurchaseError, PurchaseService};
pub use reconciler::SettlementReconciler;
pub use responder::ProtocolResponder;
pub use types::*;
