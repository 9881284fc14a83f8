// Xiwen points tracker - headless sync node
// Opens the local store, syncs once and relays realtime changes until Ctrl-C

use anyhow::Context;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xiwen_sync::app::AppState;
use xiwen_sync::config::ENV_DATA_DIR;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xiwen_sync=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting xiwen-sync");

    let data_dir = std::env::var(ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./xiwen-data"));

    let state = AppState::initialize(data_dir)
        .await
        .context("failed to initialize application state")?;

    if let Err(e) = state.sync.init().await {
        tracing::error!("Startup sync failed, continuing with local data: {}", e);
    }

    state
        .sync
        .subscribe_realtime(|table| tracing::info!("Remote {} changed, local copy refreshed", table))
        .await
        .context("failed to subscribe to realtime changes")?;

    let total = state.store.total_score().await?;
    tracing::info!("Current total score: {}", total);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    state.sync.unsubscribe_realtime();
    state.tracker.flush_mirrors().await;

    Ok(())
}
