//! Application lifecycle and graceful shutdown.
//!
//! 1. **Startup**: spawn the invoice expiry sweeper
//! 2. **Runtime**: serve HTTP
//! 3. **Shutdown**: stop accepting connections, cancel in-flight payment
//!    dispatches, stop the sweeper
//!
//! Cancelled dispatches are not resumed. Their payments stay pending until
//! settlement, expiry or an admin retry.

use crate::config::Config;
use crate::expiry::ExpirySweeper;
use crate::router::PaymentRouter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Running server with its background tasks.
pub struct Application {
    /// TCP listener for HTTP server
    listener: tokio::net::TcpListener,

    /// Axum router with all HTTP routes
    app: axum::Router,

    /// Background payment dispatch
    router: PaymentRouter,

    /// Invoice expiry sweeper
    sweeper: ExpirySweeper,

    /// Stops the sweeper
    sweeper_shutdown: watch::Sender<bool>,

    /// Application configuration
    config: Arc<Config>,
}

impl Application {
    /// Create a new application instance.
    #[must_use]
    pub const fn new(
        listener: tokio::net::TcpListener,
        app: axum::Router,
        router: PaymentRouter,
        sweeper: ExpirySweeper,
        sweeper_shutdown: watch::Sender<bool>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            listener,
            app,
            router,
            sweeper,
            sweeper_shutdown,
            config,
        }
    }

    /// Run until Ctrl+C or SIGTERM, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            address = %format!("{}:{}", self.config.server.host, self.config.server.port),
            "Starting HTTP server"
        );

        let sweeper_handle = tokio::spawn(self.sweeper.run());

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped, initiating graceful shutdown...");

        self.router.shutdown();
        if self.sweeper_shutdown.send(true).is_err() {
            warn!("Expiry sweeper already stopped");
        }

        let timeout = Duration::from_secs(self.config.server.shutdown_timeout);
        match tokio::time::timeout(timeout, sweeper_handle).await {
            Ok(Ok(())) => info!("Expiry sweeper stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Expiry sweeper task failed"),
            Err(_) => warn!("Expiry sweeper shutdown timed out"),
        }

        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
