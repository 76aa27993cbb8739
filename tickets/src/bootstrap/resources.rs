//! Infrastructure setup: storage and outbound clients.
//!
//! [`Resources`] holds every collaborator the services need, chosen by
//! `STORAGE_BACKEND` and `LIGHTNING_BACKEND`. [`assemble`] wires them into the
//! services behind the HTTP router.

use crate::config::{Config, LightningBackend, StorageBackend};
use crate::expiry::ExpirySweeper;
use crate::issuer::InvoiceIssuer;
use crate::lifecycle::LifecycleEnvironment;
use crate::lightning::{
    HttpLightningProcessor, HttpWalletConnector, LightningProcessor, WalletConnector,
};
use crate::mocks::{MockLightningProcessor, MockUmaClient, MockWalletConnector, RecordingNotifier};
use crate::purchase::PurchaseService;
use crate::reconciler::SettlementReconciler;
use crate::responder::{ProtocolResponder, ResponderConfig};
use crate::router::{LifecycleRunner, PaymentRouter};
use crate::server::AppState;
use crate::store::{InMemoryTicketStore, PostgresTicketStore, TicketStore};
use crate::uma::{HttpUmaClient, SettlementNotifier, UmaAddress, UmaClient};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uma_tickets_core::environment::{Clock, SystemClock};

/// Collaborators shared by all services
#[derive(Clone)]
pub struct Resources {
    /// Ticket and payment storage
    pub store: Arc<dyn TicketStore>,
    /// Lightning processor
    pub processor: Arc<dyn LightningProcessor>,
    /// Buyer wallet connector
    pub wallet: Arc<dyn WalletConnector>,
    /// Counterparty provider client
    pub uma: Arc<dyn UmaClient>,
    /// Post-settlement counterparty callbacks
    pub notifier: Arc<dyn SettlementNotifier>,
    /// Clock
    pub clock: Arc<dyn Clock>,
}

impl Resources {
    /// Connect storage and build clients as configured.
    ///
    /// # Errors
    ///
    /// Returns error if the webhook secret is unset for the HTTP backend, the
    /// database is unreachable, migrations fail, or an HTTP client cannot be
    /// built.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config
            .lightning
            .check_webhook_secret()
            .map_err(anyhow::Error::msg)?;

        let store: Arc<dyn TicketStore> = match config.server.storage_backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Arc::new(InMemoryTicketStore::new())
            },
            StorageBackend::Postgres => {
                let store = PostgresTicketStore::connect(
                    &config.postgres.url,
                    config.postgres.max_connections,
                    Duration::from_secs(config.postgres.connect_timeout),
                )
                .await
                .context("connecting to PostgreSQL")?;
                store.migrate().await.context("running migrations")?;
                tracing::info!("PostgreSQL storage ready");
                Arc::new(store)
            },
        };

        match config.lightning.backend {
            LightningBackend::Mock => {
                tracing::warn!("Using mock Lightning processor, wallet and provider clients");
                Ok(Self::with_store(
                    store,
                    MockLightningProcessor::shared(),
                    Arc::new(MockWalletConnector::new()),
                    Arc::new(MockUmaClient::new()),
                    Arc::new(RecordingNotifier::new()),
                ))
            },
            LightningBackend::Http => {
                let processor = HttpLightningProcessor::new(
                    &config.lightning.api_url,
                    &config.lightning.api_token,
                    Duration::from_secs(config.lightning.request_timeout_secs),
                )
                .context("building processor client")?;
                let wallet = HttpWalletConnector::new(
                    &config.wallet.bridge_url,
                    Duration::from_secs(config.wallet.request_timeout_secs),
                )
                .context("building wallet client")?;
                let uma = Arc::new(
                    HttpUmaClient::new(
                        &config.uma.discovery_scheme,
                        Duration::from_secs(config.uma.request_timeout_secs),
                    )
                    .context("building UMA client")?,
                );
                Ok(Self::with_store(
                    store,
                    Arc::new(processor),
                    Arc::new(wallet),
                    uma.clone(),
                    uma,
                ))
            },
        }
    }

    /// Resources over the given collaborators and the system clock
    #[must_use]
    pub fn with_store(
        store: Arc<dyn TicketStore>,
        processor: Arc<dyn LightningProcessor>,
        wallet: Arc<dyn WalletConnector>,
        uma: Arc<dyn UmaClient>,
        notifier: Arc<dyn SettlementNotifier>,
    ) -> Self {
        Self {
            store,
            processor,
            wallet,
            uma,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Services built from [`Resources`]
pub struct Services {
    /// State handed to the HTTP router
    pub state: AppState,
    /// Background payment dispatch
    pub router: PaymentRouter,
    /// Invoice expiry sweeper, not yet started
    pub sweeper: ExpirySweeper,
    /// Stops the sweeper when `true` is sent
    pub sweeper_shutdown: watch::Sender<bool>,
}

/// Wire resources into services.
///
/// # Errors
///
/// Returns error if the configured receiving address is malformed.
pub fn assemble(resources: Resources, config: &Config) -> anyhow::Result<Services> {
    let receiver = UmaAddress::parse(&config.uma.receiving_address)
        .with_context(|| format!("UMA_RECEIVING_ADDRESS {:?}", config.uma.receiving_address))?;

    let env = LifecycleEnvironment {
        wallet: resources.wallet,
        uma: resources.uma,
        clock: resources.clock.clone(),
        receiver: receiver.clone(),
        supported_versions: config.uma.supported_versions.clone(),
    };
    let runner = LifecycleRunner::new(resources.store.clone(), env);
    let router = PaymentRouter::new(runner.clone());

    let issuer = InvoiceIssuer::new(
        resources.processor.clone(),
        resources.clock.clone(),
        receiver.clone(),
        Duration::from_secs(config.lightning.invoice_expiry_secs),
    );
    let purchases = PurchaseService::new(
        resources.store.clone(),
        issuer,
        router.clone(),
        resources.clock.clone(),
        config.uma.base_url.clone(),
    );
    let responder = ProtocolResponder::new(
        resources.store.clone(),
        resources.clock.clone(),
        ResponderConfig {
            base_url: config.uma.base_url.clone(),
            receiver: receiver.clone(),
            min_sendable_msats: config.uma.min_sendable_msats,
            max_sendable_msats: config.uma.max_sendable_msats,
            supported_versions: config.uma.supported_versions.clone(),
        },
    );
    let reconciler = SettlementReconciler::new(
        config.lightning.webhook_secret.as_bytes(),
        resources.processor,
        resources.store.clone(),
        runner.clone(),
        resources.notifier,
        receiver.domain(),
    );
    let (sweeper, sweeper_shutdown) = ExpirySweeper::new(
        resources.store.clone(),
        runner,
        Duration::from_secs(config.lightning.expiry_sweep_secs.max(1)),
    );

    Ok(Services {
        state: AppState {
            store: resources.store,
            purchases,
            responder,
            reconciler,
            clock: resources.clock,
        },
        router,
        sweeper,
        sweeper_shutdown,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::DEV_WEBHOOK_SECRET;

    #[tokio::test]
    async fn test_http_backend_needs_webhook_secret() {
        let mut config = Config::from_env();
        config.server.storage_backend = StorageBackend::Memory;
        config.lightning.backend = LightningBackend::Http;
        config.lightning.webhook_secret = DEV_WEBHOOK_SECRET.to_string();

        let Err(error) = Resources::from_config(&config).await else {
            panic!("development secret accepted for the HTTP backend");
        };
        assert!(error.to_string().contains("LIGHTNING_WEBHOOK_SECRET"));
    }

    #[tokio::test]
    async fn test_mock_backend_starts_with_dev_secret() {
        let mut config = Config::from_env();
        config.server.storage_backend = StorageBackend::Memory;
        config.lightning.backend = LightningBackend::Mock;
        config.lightning.webhook_secret = DEV_WEBHOOK_SECRET.to_string();

        assert!(Resources::from_config(&config).await.is_ok());
    }
}
