//! Listwatch - marketplace listing watcher.
//!
//! Long-running worker that scrapes saved searches against external
//! marketplace services and pushes notifications for new listings.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if listwatch::cli::is_verbose() {
        "listwatch=debug"
    } else {
        "listwatch=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    listwatch::cli::run().await
}
