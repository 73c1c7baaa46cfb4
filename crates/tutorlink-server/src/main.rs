//! # Tutorlink Server
//!
//! Realtime coordination server for the Tutorlink marketplace.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tutorlink
//!
//! # Run with environment variables
//! TUTORLINK_PORT=8080 TUTORLINK_HOST=0.0.0.0 tutorlink
//!
//! # Point at a specific snapshot file
//! TUTORLINK_SNAPSHOT=/var/lib/tutorlink/snapshot.json tutorlink
//! ```

mod config;
mod handlers;
mod intents;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutorlink=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting Tutorlink server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
