//! Invoice expiry sweeper.
//!
//! Periodically moves pending payments whose invoice has expired to
//! `expired`. It is the only producer of that transition.

use crate::lifecycle::LifecycleAction;
use crate::router::LifecycleRunner;
use crate::store::{StoreResult, TicketStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use uma_tickets_core::environment::Clock;

/// Background task expiring unpaid invoices
pub struct ExpirySweeper {
    store: Arc<dyn TicketStore>,
    runner: LifecycleRunner,
    period: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ExpirySweeper {
    /// Create a sweeper running every `period`.
    ///
    /// Returns the sweeper and a shutdown sender; send `true` to stop it.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        runner: LifecycleRunner,
        period: Duration,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = Self {
            store,
            runner,
            period,
            shutdown: shutdown_rx,
        };
        (sweeper, shutdown_tx)
    }

    /// Sweep until shutdown. Failed sweeps are logged and retried next tick.
    pub async fn run(mut self) {
        tracing::info!(period_secs = self.period.as_secs(), "Starting invoice expiry sweeper");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        tracing::error!(%error, "Expiry sweep failed");
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Invoice expiry sweeper stopped");
    }

    /// Expire every pending payment whose invoice is past its expiry.
    /// Returns how many were moved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::store::StoreError) if the candidates
    /// cannot be listed. Per-payment failures are logged and skipped.
    pub async fn sweep_once(&self) -> StoreResult<usize> {
        let now = self.runner.environment().clock.now();
        let candidates = self.store.expired_pending_payments(now).await?;
        let mut expired = 0;

        for payment in candidates {
            match self
                .runner
                .apply(payment.ticket_id, LifecycleAction::InvoiceExpired { at: now })
                .await
            {
                Ok(outcome) if outcome.persisted => expired += 1,
                Ok(_) => {},
                Err(error) => {
                    tracing::warn!(ticket_id = %payment.ticket_id, %error, "Could not expire payment");
                },
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expired unpaid invoices");
        }
        Ok(expired)
    }
}
