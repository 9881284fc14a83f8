//! Application state and initialization
//!
//! Builds the Local Store and Sync Coordinator pair exactly once and hands out
//! clones of the handles to whatever needs them.

use crate::config::{SyncConfig, SyncTiming, DATABASE_FILE};
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::services::TrackerService;
use crate::storage::LocalStore;
use crate::sync::SyncCoordinator;
use std::path::PathBuf;
use std::sync::Arc;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub app_data_dir: PathBuf,
    pub store: LocalStore,
    pub sync: Arc<SyncCoordinator>,
    pub tracker: TrackerService,
}

impl AppState {
    /// Wire up already-built parts
    pub fn assemble(app_data_dir: PathBuf, store: LocalStore, sync: SyncCoordinator) -> Self {
        let sync = Arc::new(sync);
        let tracker = TrackerService::new(store.clone(), sync.clone());

        Self {
            app_data_dir,
            store,
            sync,
            tracker,
        }
    }

    /// Open the database under `app_data_dir` and connect sync if configured
    pub async fn initialize(app_data_dir: PathBuf) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("App data directory: {:?}", app_data_dir);

        std::fs::create_dir_all(&app_data_dir)?;

        let pool = create_pool(&app_data_dir.join(DATABASE_FILE)).await?;
        let store = LocalStore::open(Repository::new(pool)).await?;

        let config = SyncConfig::resolve(&app_data_dir).await?;
        let sync = SyncCoordinator::connect(store.clone(), config.as_ref(), SyncTiming::default()).await;

        tracing::info!(
            "Application initialized successfully (cloud sync {})",
            if sync.is_enabled() { "on" } else { "off" }
        );

        Ok(Self::assemble(app_data_dir, store, sync))
    }
}
