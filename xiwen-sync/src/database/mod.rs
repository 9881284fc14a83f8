//! Database module
//!
//! SQLite is the durable half of the local store. Its schema is a single
//! `kv_store` table: every entity collection and every scalar setting is one
//! row, so rewriting a collection is a single-row upsert.

pub mod models;
pub mod repository;
pub mod schema;

pub use models::*;
pub use repository::Repository;
pub use schema::initialize_database;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Readers run alongside the one writer the store lock lets through
const READ_CONNECTIONS: u32 = 4;

fn file_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
}

/// Open the on-disk database, creating and migrating it as needed.
///
/// The schema is brought up to date over a single connection that is closed
/// before the shared pool opens.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Opening local database at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let migrator = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(file_options(db_path))
        .await?;
    initialize_database(&migrator).await?;
    migrator.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(1 + READ_CONNECTIONS)
        .connect_with(file_options(db_path))
        .await?;

    tracing::debug!("Local database ready");
    Ok(pool)
}

/// Throwaway database for tests. One connection, so every query sees the same memory.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    initialize_database(&pool).await?;
    Ok(pool)
}
