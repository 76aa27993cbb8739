//! Payment lifecycle reducer.
//!
//! One reducer owns both state machines a purchase goes through:
//!
//! - routing: `NotStarted → WalletAttempted → RequestPushed → Settled | Failed`
//! - status: `pending → paid | failed | expired`, with an admin retry edge from
//!   `failed | expired` back to `pending`
//!
//! The wallet attempt and the push are returned as [`Effect::Future`]s that
//! feed back their outcome; the reducer itself performs no I/O. Persisting a
//! status change is the caller's job (see [`crate::router::PaymentRouter`]).

use crate::lightning::{WalletConnector, WalletError};
use crate::types::{Payment, PaymentStatus, Sats, Ticket, TicketId, TicketStatus, WalletCredential};
use crate::uma::{PaymentRequestPush, UmaAddress, UmaClient, UmaClientError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uma_tickets_core::{SmallVec, effect::Effect, environment::Clock, reducer::Reducer, smallvec};

// ============================================================================
// State
// ============================================================================

/// Where the router is for one purchase attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterStage {
    /// No dispatch yet
    NotStarted,
    /// Wallet instructed to pay
    WalletAttempted,
    /// Payment request pushed to the buyer's provider
    RequestPushed,
    /// Settlement reconciled
    Settled,
    /// Terminal non-paid outcome
    Failed,
}

/// Everything needed to route one payment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchContext {
    /// Ticket being paid for
    pub ticket_id: TicketId,
    /// Buyer's address
    pub buyer: UmaAddress,
    /// Encoded invoice to pay
    pub invoice: String,
    /// Amount due
    pub amount: Sats,
    /// Invoice expiry
    pub expires_at: DateTime<Utc>,
    /// Pull callback unique to this ticket
    pub callback_url: String,
    /// Shown to the buyer
    pub description: String,
    /// Buyer's stored wallet connection, if any
    pub credential: Option<WalletCredential>,
}

/// Lifecycle of one ticket/payment pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentLifecycle {
    /// Ticket
    pub ticket_id: TicketId,
    /// Ticket status
    pub ticket_status: TicketStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Router stage
    pub stage: RouterStage,
    /// Settlement time
    pub paid_at: Option<DateTime<Utc>>,
    /// Why the payment failed or expired
    pub failure_reason: Option<String>,
    /// Last rejected action or recovered error
    pub last_error: Option<String>,
    /// Active dispatch
    pub context: Option<DispatchContext>,
}

impl PaymentLifecycle {
    /// A freshly created pending purchase
    #[must_use]
    pub const fn pending(ticket_id: TicketId) -> Self {
        Self {
            ticket_id,
            ticket_status: TicketStatus::Pending,
            payment_status: PaymentStatus::Pending,
            stage: RouterStage::NotStarted,
            paid_at: None,
            failure_reason: None,
            last_error: None,
            context: None,
        }
    }

    /// Rebuild the lifecycle from stored records
    #[must_use]
    pub fn from_records(ticket: &Ticket, payment: &Payment) -> Self {
        let stage = match payment.status {
            PaymentStatus::Pending => RouterStage::NotStarted,
            PaymentStatus::Paid => RouterStage::Settled,
            PaymentStatus::Failed | PaymentStatus::Expired => RouterStage::Failed,
        };
        Self {
            ticket_id: ticket.id,
            ticket_status: ticket.status,
            payment_status: payment.status,
            stage,
            paid_at: payment.paid_at,
            failure_reason: None,
            last_error: None,
            context: None,
        }
    }

    fn set_status(&mut self, status: PaymentStatus) {
        self.payment_status = status;
        self.ticket_status = TicketStatus::from(status);
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Commands and outcomes driving the lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Start routing the payment
    Dispatch {
        /// Routing inputs
        context: Box<DispatchContext>,
    },
    /// Wallet accepted the payment instruction
    WalletPaid,
    /// Wallet attempt failed; falls back to a push
    WalletFailed {
        /// Failure description
        reason: String,
    },
    /// Provider accepted the pushed request
    PushDelivered,
    /// Push could not be delivered
    PushFailed {
        /// Failure description
        reason: String,
    },
    /// Reconciler matched a settlement to this payment
    SettlementMatched {
        /// Settlement time
        paid_at: DateTime<Utc>,
    },
    /// Invoice expired unpaid
    InvoiceExpired {
        /// When expiry was observed
        at: DateTime<Utc>,
    },
    /// Admin retry of a failed or expired payment
    RetryRequested,
}

// ============================================================================
// Environment
// ============================================================================

/// Dispatch failure, carried back as a reason string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Wallet attempt failed
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Push to the buyer's provider failed
    #[error(transparent)]
    Push(#[from] UmaClientError),
}

/// Collaborators the lifecycle effects call
#[derive(Clone)]
pub struct LifecycleEnvironment {
    /// Buyer wallet connector
    pub wallet: Arc<dyn WalletConnector>,
    /// Provider discovery and push
    pub uma: Arc<dyn UmaClient>,
    /// Clock
    pub clock: Arc<dyn Clock>,
    /// Address payments are received at
    pub receiver: UmaAddress,
    /// Protocol major versions we speak
    pub supported_versions: Vec<u32>,
}

/// Highest protocol major version both sides support
#[must_use]
pub fn negotiate_version(ours: &[u32], theirs: &[u32]) -> Option<u32> {
    ours.iter().filter(|v| theirs.contains(v)).max().copied()
}

async fn push_payment_request(
    uma: &dyn UmaClient,
    supported_versions: &[u32],
    request: PaymentRequestPush,
    domain: &str,
) -> Result<(), DispatchError> {
    let configuration = uma.discover(domain).await?;
    if negotiate_version(supported_versions, &configuration.uma_major_versions).is_none() {
        return Err(UmaClientError::UnsupportedVersion(configuration.uma_major_versions).into());
    }
    let endpoint = configuration
        .uma_request_endpoint
        .ok_or_else(|| UmaClientError::NoRequestEndpoint(domain.to_string()))?;
    uma.push_request(&endpoint, &request).await?;
    Ok(())
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for [`PaymentLifecycle`]
#[derive(Clone, Debug, Default)]
pub struct LifecycleReducer;

impl LifecycleReducer {
    /// Creates a new `LifecycleReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn wallet_effect(
        env: &LifecycleEnvironment,
        credential: WalletCredential,
        invoice: String,
    ) -> Effect<LifecycleAction> {
        let wallet = Arc::clone(&env.wallet);
        Effect::future(async move {
            match wallet.pay_invoice(&credential, &invoice).await {
                Ok(_) => Some(LifecycleAction::WalletPaid),
                Err(error) => Some(LifecycleAction::WalletFailed {
                    reason: DispatchError::from(error).to_string(),
                }),
            }
        })
    }

    fn push_effect(env: &LifecycleEnvironment, context: &DispatchContext) -> Effect<LifecycleAction> {
        let uma = Arc::clone(&env.uma);
        let supported_versions = env.supported_versions.clone();
        let domain = context.buyer.domain().to_string();
        let request = PaymentRequestPush {
            sender_uma: context.buyer.to_string(),
            receiver_uma: env.receiver.to_string(),
            amount: context.amount.get(),
            currency: "SAT".to_string(),
            callback: context.callback_url.clone(),
            expires_at: context.expires_at.timestamp(),
            description: context.description.clone(),
        };
        Effect::future(async move {
            match push_payment_request(uma.as_ref(), &supported_versions, request, &domain).await {
                Ok(()) => Some(LifecycleAction::PushDelivered),
                Err(error) => Some(LifecycleAction::PushFailed {
                    reason: error.to_string(),
                }),
            }
        })
    }

    fn reject(state: &mut PaymentLifecycle, error: String) -> SmallVec<[Effect<LifecycleAction>; 4]> {
        state.last_error = Some(error);
        SmallVec::new()
    }
}

impl Reducer for LifecycleReducer {
    type State = PaymentLifecycle;
    type Action = LifecycleAction;
    type Environment = LifecycleEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Routing ==========
            LifecycleAction::Dispatch { context } => {
                if state.payment_status != PaymentStatus::Pending
                    || state.stage != RouterStage::NotStarted
                {
                    return Self::reject(
                        state,
                        format!(
                            "cannot dispatch payment in status {} at stage {:?}",
                            state.payment_status, state.stage
                        ),
                    );
                }

                let credential = context
                    .credential
                    .clone()
                    .filter(|credential| credential.is_usable(env.clock.now()));

                let effect = if let Some(credential) = credential {
                    state.stage = RouterStage::WalletAttempted;
                    Self::wallet_effect(env, credential, context.invoice.clone())
                } else {
                    state.stage = RouterStage::RequestPushed;
                    Self::push_effect(env, &context)
                };
                state.context = Some(*context);
                smallvec![effect]
            },

            // Settlement still arrives through the reconciler
            LifecycleAction::WalletPaid => SmallVec::new(),

            LifecycleAction::WalletFailed { reason } => {
                if state.stage != RouterStage::WalletAttempted
                    || state.payment_status != PaymentStatus::Pending
                {
                    return SmallVec::new();
                }
                let Some(context) = state.context.as_ref() else {
                    return Self::reject(state, "wallet failed without dispatch context".to_string());
                };
                let effect = Self::push_effect(env, context);
                state.stage = RouterStage::RequestPushed;
                state.last_error = Some(reason);
                smallvec![effect]
            },

            // Awaiting the counterparty pull and settlement
            LifecycleAction::PushDelivered => SmallVec::new(),

            LifecycleAction::PushFailed { reason } => {
                if state.payment_status != PaymentStatus::Pending {
                    return Self::reject(
                        state,
                        format!("push failed after payment became {}", state.payment_status),
                    );
                }
                state.set_status(PaymentStatus::Failed);
                state.stage = RouterStage::Failed;
                state.failure_reason = Some(reason);
                SmallVec::new()
            },

            // ========== Settlement ==========
            LifecycleAction::SettlementMatched { paid_at } => match state.payment_status {
                PaymentStatus::Pending => {
                    state.set_status(PaymentStatus::Paid);
                    state.stage = RouterStage::Settled;
                    state.paid_at = Some(paid_at);
                    SmallVec::new()
                },
                PaymentStatus::Paid => SmallVec::new(),
                status @ (PaymentStatus::Failed | PaymentStatus::Expired) => Self::reject(
                    state,
                    format!("settlement arrived for {status} payment"),
                ),
            },

            LifecycleAction::InvoiceExpired { at } => {
                if state.payment_status != PaymentStatus::Pending {
                    return SmallVec::new();
                }
                state.set_status(PaymentStatus::Expired);
                state.stage = RouterStage::Failed;
                state.failure_reason = Some(format!("invoice expired at {at}"));
                SmallVec::new()
            },

            // ========== Admin ==========
            LifecycleAction::RetryRequested => {
                if !state.payment_status.is_retryable() {
                    return Self::reject(
                        state,
                        format!("cannot retry payment in status {}", state.payment_status),
                    );
                }
                state.set_status(PaymentStatus::Pending);
                state.stage = RouterStage::NotStarted;
                state.failure_reason = None;
                state.last_error = None;
                state.context = None;
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{MockUmaClient, MockWalletConnector};
    use crate::types::UserId;
    use uma_tickets_testing::{ReducerTest, assertions, test_clock};

    fn test_env() -> LifecycleEnvironment {
        LifecycleEnvironment {
            wallet: Arc::new(MockWalletConnector::new()),
            uma: Arc::new(MockUmaClient::new()),
            clock: Arc::new(test_clock()),
            receiver: UmaAddress::parse("$tickets@events.example").unwrap(),
            supported_versions: vec![1, 0],
        }
    }

    fn context(ticket_id: TicketId, credential: Option<WalletCredential>) -> Box<DispatchContext> {
        Box::new(DispatchContext {
            ticket_id,
            buyer: UmaAddress::parse("$alice@wallet.example").unwrap(),
            invoice: "lnbcrt21000n1test".to_string(),
            amount: Sats::new(2_100),
            expires_at: test_clock().now() + chrono::Duration::minutes(10),
            callback_url: format!("https://events.example/api/uma/payreq/{ticket_id}"),
            description: "Ticket".to_string(),
            credential,
        })
    }

    fn credential(expires_at: Option<DateTime<Utc>>) -> WalletCredential {
        WalletCredential {
            user_id: UserId::new(),
            connection_uri: "nostr+walletconnect://relay?secret=abc".to_string(),
            expires_at,
            updated_at: test_clock().now(),
        }
    }

    fn in_status(status: PaymentStatus) -> PaymentLifecycle {
        let mut state = PaymentLifecycle::pending(TicketId::new());
        state.set_status(status);
        state
    }

    #[test]
    fn test_dispatch_prefers_usable_wallet_credential() {
        let ticket_id = TicketId::new();
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(ticket_id))
            .when_action(LifecycleAction::Dispatch {
                context: context(ticket_id, Some(credential(None))),
            })
            .then_state(|state| {
                assert_eq!(state.stage, RouterStage::WalletAttempted);
                assert!(state.context.is_some());
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_dispatch_with_expired_credential_pushes() {
        let ticket_id = TicketId::new();
        let expired = Some(test_clock().now() - chrono::Duration::hours(1));
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(ticket_id))
            .when_action(LifecycleAction::Dispatch {
                context: context(ticket_id, Some(credential(expired))),
            })
            .then_state(|state| assert_eq!(state.stage, RouterStage::RequestPushed))
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[test]
    fn test_wallet_failure_falls_back_to_push() {
        let ticket_id = TicketId::new();
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(ticket_id))
            .when_action(LifecycleAction::Dispatch {
                context: context(ticket_id, Some(credential(None))),
            })
            .when_action(LifecycleAction::WalletFailed {
                reason: "insufficient budget".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.stage, RouterStage::RequestPushed);
                assert_eq!(state.payment_status, PaymentStatus::Pending);
                assert_eq!(state.last_error.as_deref(), Some("insufficient budget"));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_wallet_paid_ends_routing() {
        let ticket_id = TicketId::new();
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(ticket_id))
            .when_action(LifecycleAction::Dispatch {
                context: context(ticket_id, Some(credential(None))),
            })
            .when_action(LifecycleAction::WalletPaid)
            .then_state(|state| {
                assert_eq!(state.stage, RouterStage::WalletAttempted);
                assert_eq!(state.payment_status, PaymentStatus::Pending);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_push_failure_marks_failed() {
        let ticket_id = TicketId::new();
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(ticket_id))
            .when_action(LifecycleAction::Dispatch {
                context: context(ticket_id, None),
            })
            .when_action(LifecycleAction::PushFailed {
                reason: "provider unreachable".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.ticket_status, TicketStatus::Failed);
                assert_eq!(state.payment_status, PaymentStatus::Failed);
                assert_eq!(state.stage, RouterStage::Failed);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_second_dispatch_rejected() {
        let ticket_id = TicketId::new();
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(ticket_id))
            .when_action(LifecycleAction::Dispatch {
                context: context(ticket_id, None),
            })
            .when_action(LifecycleAction::Dispatch {
                context: context(ticket_id, Some(credential(None))),
            })
            .then_state(|state| {
                assert_eq!(state.stage, RouterStage::RequestPushed);
                assert!(state.last_error.is_some());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_settlement_marks_paid_once() {
        let paid_at = test_clock().now();
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(TicketId::new()))
            .when_action(LifecycleAction::SettlementMatched { paid_at })
            .when_action(LifecycleAction::SettlementMatched {
                paid_at: paid_at + chrono::Duration::minutes(1),
            })
            .then_state(move |state| {
                assert_eq!(state.ticket_status, TicketStatus::Paid);
                assert_eq!(state.payment_status, PaymentStatus::Paid);
                assert_eq!(state.paid_at, Some(paid_at));
                assert!(state.last_error.is_none());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_settlement_on_failed_payment_rejected() {
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(in_status(PaymentStatus::Failed))
            .when_action(LifecycleAction::SettlementMatched {
                paid_at: test_clock().now(),
            })
            .then_state(|state| {
                assert_eq!(state.payment_status, PaymentStatus::Failed);
                assert!(state.paid_at.is_none());
                assert!(state.last_error.is_some());
            })
            .run();
    }

    #[test]
    fn test_invoice_expiry() {
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(PaymentLifecycle::pending(TicketId::new()))
            .when_action(LifecycleAction::InvoiceExpired {
                at: test_clock().now(),
            })
            .then_state(|state| {
                assert_eq!(state.ticket_status, TicketStatus::Expired);
                assert_eq!(state.payment_status, PaymentStatus::Expired);
            })
            .run();
    }

    #[test]
    fn test_expiry_does_not_leave_paid() {
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(in_status(PaymentStatus::Paid))
            .when_action(LifecycleAction::InvoiceExpired {
                at: test_clock().now(),
            })
            .then_state(|state| assert_eq!(state.payment_status, PaymentStatus::Paid))
            .run();
    }

    #[test]
    fn test_retry_resets_failed_payment() {
        ReducerTest::new(LifecycleReducer::new())
            .with_env(test_env())
            .given_state(in_status(PaymentStatus::Expired))
            .when_action(LifecycleAction::RetryRequested)
            .then_state(|state| {
                assert_eq!(state.ticket_status, TicketStatus::Pending);
                assert_eq!(state.payment_status, PaymentStatus::Pending);
                assert_eq!(state.stage, RouterStage::NotStarted);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_retry_rejected_for_pending_and_paid() {
        for status in [PaymentStatus::Pending, PaymentStatus::Paid] {
            ReducerTest::new(LifecycleReducer::new())
                .with_env(test_env())
                .given_state(in_status(status))
                .when_action(LifecycleAction::RetryRequested)
                .then_state(move |state| {
                    assert_eq!(state.payment_status, status);
                    assert!(state.last_error.is_some());
                })
                .run();
        }
    }

    #[test]
    fn test_negotiate_version() {
        assert_eq!(negotiate_version(&[1, 0], &[0, 1]), Some(1));
        assert_eq!(negotiate_version(&[1, 0], &[0]), Some(0));
        assert_eq!(negotiate_version(&[1], &[2]), None);
    }

    #[tokio::test]
    async fn test_push_effect_reports_delivery() {
        let uma = Arc::new(MockUmaClient::new());
        let env = LifecycleEnvironment {
            uma: uma.clone(),
            ..test_env()
        };
        let ticket_id = TicketId::new();
        let mut state = PaymentLifecycle::pending(ticket_id);

        let effects = LifecycleReducer::new().reduce(
            &mut state,
            LifecycleAction::Dispatch {
                context: context(ticket_id, None),
            },
            &env,
        );
        let mut produced = Vec::new();
        for effect in effects {
            produced.extend(uma_tickets_core::effect::execute(effect).await);
        }

        assert_eq!(produced, vec![LifecycleAction::PushDelivered]);
        let pushes = uma.pushed();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].sender_uma, "$alice@wallet.example");
        assert_eq!(pushes[0].receiver_uma, "$tickets@events.example");
        assert_eq!(pushes[0].amount, 2_100);
    }
}
