//! Running the payment lifecycle against real collaborators.
//!
//! [`LifecycleRunner`] feeds an action through [`LifecycleReducer`], executes
//! the returned effects, loops their output back in, and persists every status
//! change as a guarded transition. [`PaymentRouter`] uses it to dispatch a
//! payment on a detached task; the reconciler, expiry sweeper and admin retry
//! use it to apply single actions.

use crate::lifecycle::{
    DispatchContext, LifecycleAction, LifecycleEnvironment, LifecycleReducer, PaymentLifecycle,
};
use crate::metrics;
use crate::store::{StoreError, StoreResult, TicketStore, Transition};
use crate::types::{PaymentStatus, TicketId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uma_tickets_core::effect::execute;
use uma_tickets_core::reducer::Reducer;

/// Result of running actions to quiescence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Final lifecycle state
    pub state: PaymentLifecycle,
    /// Whether a status change was written to storage
    pub persisted: bool,
}

/// Drives [`LifecycleReducer`] and persists the transitions it makes
#[derive(Clone)]
pub struct LifecycleRunner {
    store: Arc<dyn TicketStore>,
    env: LifecycleEnvironment,
    reducer: LifecycleReducer,
}

impl LifecycleRunner {
    /// Create a runner
    #[must_use]
    pub const fn new(store: Arc<dyn TicketStore>, env: LifecycleEnvironment) -> Self {
        Self {
            store,
            env,
            reducer: LifecycleReducer::new(),
        }
    }

    /// Collaborators the effects call
    #[must_use]
    pub const fn environment(&self) -> &LifecycleEnvironment {
        &self.env
    }

    /// The reducer actions are fed through
    #[must_use]
    pub const fn reducer(&self) -> &LifecycleReducer {
        &self.reducer
    }

    /// Load the stored lifecycle of `ticket_id` and apply `action` to it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the ticket or its payment does not exist
    /// - [`StoreError::Database`] if loading or persisting fails
    pub async fn apply(&self, ticket_id: TicketId, action: LifecycleAction) -> StoreResult<RunOutcome> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("ticket {ticket_id}")))?;
        let payment = self
            .store
            .payment_for_ticket(ticket_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("payment for ticket {ticket_id}")))?;

        self.run(PaymentLifecycle::from_records(&ticket, &payment), action)
            .await
    }

    /// Apply `action` to `state`, then every action its effects produce.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a transition cannot be persisted.
    pub async fn run(&self, mut state: PaymentLifecycle, action: LifecycleAction) -> StoreResult<RunOutcome> {
        let mut persisted = false;
        let mut queue = VecDeque::from([action]);

        while let Some(action) = queue.pop_front() {
            record_dispatch_outcome(&action);

            let before = state.payment_status;
            let effects = self.reducer.reduce(&mut state, action, &self.env);

            if state.payment_status != before {
                persisted |= self.persist(&mut state, before).await?;
            }
            if let Some(error) = state.last_error.take() {
                tracing::warn!(ticket_id = %state.ticket_id, %error, "Lifecycle action not applied cleanly");
            }

            for effect in effects {
                queue.extend(execute(effect).await);
            }
        }

        Ok(RunOutcome { state, persisted })
    }

    async fn persist(&self, state: &mut PaymentLifecycle, from: PaymentStatus) -> StoreResult<bool> {
        let transition = Transition {
            from,
            to: state.payment_status,
            at: state.paid_at.unwrap_or_else(|| self.env.clock.now()),
        };
        if self.store.apply_transition(state.ticket_id, transition).await? {
            tracing::info!(
                ticket_id = %state.ticket_id,
                from = %transition.from,
                to = %transition.to,
                "Payment status changed"
            );
            metrics::record_payment_status(transition.to);
            return Ok(true);
        }

        // Lost a race with another writer; adopt what is stored
        if let Some(stored) = self.store.payment_for_ticket(state.ticket_id).await? {
            tracing::info!(
                ticket_id = %state.ticket_id,
                attempted = %transition.to,
                stored = %stored.status,
                "Transition skipped, payment already moved"
            );
            state.payment_status = stored.status;
            state.ticket_status = stored.status.into();
            state.paid_at = stored.paid_at;
        }
        Ok(false)
    }
}

fn record_dispatch_outcome(action: &LifecycleAction) {
    match action {
        LifecycleAction::WalletPaid => metrics::record_dispatch("wallet", "succeeded"),
        LifecycleAction::WalletFailed { .. } => metrics::record_dispatch("wallet", "failed"),
        LifecycleAction::PushDelivered => metrics::record_dispatch("push", "succeeded"),
        LifecycleAction::PushFailed { .. } => metrics::record_dispatch("push", "failed"),
        _ => {},
    }
}

/// Dispatches payments on detached tasks.
///
/// A dispatch has no caller to report to; its only visible effects are the
/// `failed` transition or silence until settlement. Tasks stop at their next
/// await point once [`PaymentRouter::shutdown`] is called.
#[derive(Clone)]
pub struct PaymentRouter {
    runner: LifecycleRunner,
    shutdown: broadcast::Sender<()>,
}

impl PaymentRouter {
    /// Create a router
    #[must_use]
    pub fn new(runner: LifecycleRunner) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { runner, shutdown }
    }

    /// The runner dispatches are driven by
    #[must_use]
    pub const fn runner(&self) -> &LifecycleRunner {
        &self.runner
    }

    /// Route a pending payment in the background.
    ///
    /// The stored lifecycle is loaded first; a payment that already left
    /// `pending` is not routed.
    ///
    /// The returned handle resolves to the final lifecycle, or `None` when the
    /// task was cancelled or failed to persist.
    pub fn dispatch(&self, context: DispatchContext) -> JoinHandle<Option<PaymentLifecycle>> {
        let runner = self.runner.clone();
        let mut shutdown = self.shutdown.subscribe();
        let ticket_id = context.ticket_id;

        tokio::spawn(async move {
            let action = LifecycleAction::Dispatch {
                context: Box::new(context),
            };
            tokio::select! {
                result = runner.apply(ticket_id, action) => match result {
                    Ok(outcome) => {
                        tracing::debug!(
                            %ticket_id,
                            stage = ?outcome.state.stage,
                            status = %outcome.state.payment_status,
                            "Dispatch finished"
                        );
                        Some(outcome.state)
                    },
                    Err(error) => {
                        tracing::error!(%ticket_id, %error, "Dispatch failed to persist");
                        None
                    },
                },
                Ok(()) = shutdown.recv() => {
                    tracing::warn!(%ticket_id, "Dispatch cancelled by shutdown");
                    None
                },
            }
        })
    }

    /// Signal every in-flight dispatch to stop
    pub fn shutdown(&self) {
        let cancelled = self.shutdown.send(()).unwrap_or(0);
        tracing::info!(cancelled, "Payment router shutting down");
    }
}
