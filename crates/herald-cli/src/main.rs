//! # Herald
//!
//! Terminal client that follows one subject's notifications over the Herald
//! realtime link.
//!
//! ## Usage
//!
//! ```bash
//! # Credentials from the environment
//! HERALD_SUBJECT_ID=u1 HERALD_TOKEN=... herald
//!
//! # Override any config value
//! HERALD__SERVER__WEBSOCKET_URL=wss://push.example.com/ws herald
//! ```

mod app;
mod config;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::HeraldConfig::load()?;

    tracing::info!(
        websocket = %config.server.websocket_url,
        api = %config.server.api_base_url,
        "Starting Herald client"
    );

    if config.metrics.enabled {
        metrics::init_metrics(config.metrics.port)?;
    }

    app::run(config).await
}
