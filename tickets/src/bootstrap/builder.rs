//! Declarative application builder.
//!
//! ```rust,ignore
//! ApplicationBuilder::new()
//!     .with_config(Config::from_env())
//!     .with_tracing()?
//!     .with_metrics()?
//!     .with_resources().await?
//!     .build().await?
//!     .run().await?;
//! ```

use super::resources::{Resources, assemble};
use crate::config::Config;
use crate::metrics::register_business_metrics;
use crate::runtime::Application;
use crate::server::build_router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Builder for a fully configured ticketing server.
///
/// Steps must run in order: config, then resources, then build. Tracing and
/// metrics are optional.
#[derive(Default)]
pub struct ApplicationBuilder {
    config: Option<Arc<Config>>,
    resources: Option<Resources>,
}

impl ApplicationBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set application configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Initialise `tracing-subscriber`, filtered by `RUST_LOG` or the
    /// configured log level.
    ///
    /// # Errors
    ///
    /// Returns error if a global subscriber is already installed.
    pub fn with_tracing(self) -> Result<Self, Box<dyn std::error::Error>> {
        let default_filter = self
            .config
            .as_ref()
            .map_or("info,uma_tickets=debug,sqlx=warn", |config| config.server.log_level.as_str());

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;

        Ok(self)
    }

    /// Install the Prometheus recorder and exporter, then register metric
    /// descriptions.
    ///
    /// # Errors
    ///
    /// Returns error if config is not set, the metrics address is invalid, or
    /// a recorder is already installed.
    pub fn with_metrics(self) -> Result<Self, Box<dyn std::error::Error>> {
        let config = self
            .config
            .as_ref()
            .ok_or("Config must be set before installing metrics")?;

        let addr: SocketAddr =
            format!("{}:{}", config.server.metrics_host, config.server.metrics_port).parse()?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        register_business_metrics();
        tracing::info!(%addr, "Prometheus exporter listening");

        Ok(self)
    }

    /// Connect storage and build outbound clients.
    ///
    /// # Errors
    ///
    /// Returns error if config is not set or any resource fails to initialise.
    pub async fn with_resources(mut self) -> Result<Self, Box<dyn std::error::Error>> {
        let config = self
            .config
            .as_ref()
            .ok_or("Config must be set before initializing resources")?;

        let resources = Resources::from_config(config).await?;
        self.resources = Some(resources);

        Ok(self)
    }

    /// Wire services, build the router and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns error if a previous step was skipped, the configuration is
    /// inconsistent, or the listener cannot bind.
    pub async fn build(self) -> Result<Application, Box<dyn std::error::Error>> {
        let config = self.config.ok_or("Config must be set before build")?;
        let resources = self
            .resources
            .ok_or("Resources must be initialized before build")?;

        let services = assemble(resources, &config)?;
        let app = build_router(services.state);

        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&address).await?;
        tracing::info!(%address, "Listener bound");

        Ok(Application::new(
            listener,
            app,
            services.router,
            services.sweeper,
            services.sweeper_shutdown,
            config,
        ))
    }
}
