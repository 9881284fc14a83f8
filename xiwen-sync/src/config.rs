//! Application configuration
//!
//! Central location for storage keys, defaults and timing windows, plus the
//! remote endpoint configuration loaded from the environment or the data directory.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

// ===== Local storage keys =====

pub const KEY_TASKS: &str = "xiwen_tasks";
pub const KEY_RECORDS: &str = "xiwen_records";
pub const KEY_GIFTS: &str = "xiwen_gifts";
pub const KEY_REQUESTS: &str = "xiwen_requests";
pub const KEY_PIN: &str = "xiwen_pin";
pub const KEY_INITIALIZED: &str = "xiwen_initialized";
pub const KEY_SETTINGS: &str = "xiwen_settings";

// ===== PIN =====

/// PIN used until a parent sets one
pub const DEFAULT_PIN: &str = "1234";

/// Shortest accepted passcode
pub const MIN_PIN_LENGTH: usize = 4;

/// Remote settings key the PIN is mirrored under
pub const PIN_SETTING_KEY: &str = "parent_pin";

// ===== Identifiers =====

/// Provisional ids are millisecond timestamps, so anything at or above this
/// value (2001-09-09) was assigned locally. Server sequences stay far below it.
pub const PROVISIONAL_ID_FLOOR: i64 = 1_000_000_000_000;

/// Built-in tasks are numbered from here. They exist only on this device until
/// migrated, so their ids must never meet a server sequence value.
pub const SEED_TASK_ID_BASE: i64 = PROVISIONAL_ID_FLOOR;

// ===== Manual score adjustments =====

pub const INITIAL_SCORE_TASK_NAME: &str = "积分初始化";
pub const INITIAL_SCORE_NOTE: &str = "从纸质表格导入的初始积分";

// ===== Sync timing =====

/// Quiet period before a burst of change notifications triggers one pull
pub const REALTIME_DEBOUNCE_MS: u64 = 500;

/// How long notifications are ignored after a local delete reached the backend
pub const DELETE_SUPPRESS_MS: u64 = 1_000;

/// Timeout for a single remote HTTP call
pub const REMOTE_TIMEOUT_SECS: u64 = 30;

/// Phoenix channels drop sockets that stay silent for longer than this
pub const REALTIME_HEARTBEAT_SECS: u64 = 30;

/// Delay before a dropped realtime socket reconnects
pub const REALTIME_RECONNECT_SECS: u64 = 5;

// ===== Files and environment =====

pub const SYNC_CONFIG_FILE: &str = "sync_config.json";
pub const DATABASE_FILE: &str = "xiwen.db";
pub const ENV_SYNC_URL: &str = "XIWEN_SUPABASE_URL";
pub const ENV_SYNC_KEY: &str = "XIWEN_SUPABASE_KEY";
pub const ENV_DATA_DIR: &str = "XIWEN_DATA_DIR";

/// Remote backend endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub url: String,
    pub anon_key: String,
}

impl SyncConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
        }
    }

    /// Cloud sync is only attempted when both halves are present
    pub fn is_complete(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }

    /// Read the endpoint from the environment, if both variables are set
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(ENV_SYNC_URL).ok()?;
        let anon_key = std::env::var(ENV_SYNC_KEY).ok()?;
        Some(Self::new(url, anon_key))
    }

    /// Load `sync_config.json` from the data directory
    pub async fn load(data_dir: &Path) -> Result<Option<Self>> {
        let path = data_dir.join(SYNC_CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let config: SyncConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::Generic(format!("Failed to parse sync config: {}", e)))?;

        Ok(Some(config))
    }

    /// Persist the endpoint to the data directory
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(data_dir.join(SYNC_CONFIG_FILE), content).await?;
        tracing::info!("Sync config saved for {}", self.url);
        Ok(())
    }

    /// Environment first, then the config file. Incomplete configs count as absent.
    pub async fn resolve(data_dir: &Path) -> Result<Option<Self>> {
        let config = match Self::from_env() {
            Some(config) => Some(config),
            None => match Self::load(data_dir).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable sync config, staying local-only: {}", e);
                    None
                }
            },
        };

        Ok(config.filter(|c| {
            if !c.is_complete() {
                tracing::warn!("Sync config has empty URL or key, staying local-only");
            }
            c.is_complete()
        }))
    }
}

/// Timing windows used by the sync coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    pub debounce: Duration,
    pub suppress_window: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(REALTIME_DEBOUNCE_MS),
            suppress_window: Duration::from_millis(DELETE_SUPPRESS_MS),
        }
    }
}
