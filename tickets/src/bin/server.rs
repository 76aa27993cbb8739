//! UMA ticketing server.
//!
//! # Usage
//!
//! ```bash
//! # Development: in-memory storage and mock Lightning backend
//! STORAGE_BACKEND=memory LIGHTNING_BACKEND=mock cargo run --bin server
//!
//! # Production
//! DATABASE_URL=postgres://... LIGHTNING_API_URL=... LIGHTNING_API_TOKEN=... \
//!   LIGHTNING_WEBHOOK_SECRET=... UMA_RECEIVING_ADDRESS='$tickets@tickets.example' \
//!   UMA_BASE_URL=https://tickets.example cargo run --release --bin server
//! ```

use uma_tickets::{ApplicationBuilder, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    let app = ApplicationBuilder::new()
        .with_config(config)
        .with_tracing()?
        .with_metrics()?
        .with_resources()
        .await?
        .build()
        .await?;

    tracing::info!("UMA ticketing server is running; press Ctrl+C to shut down");
    app.run().await
}
