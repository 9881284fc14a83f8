//! Schema migrations
//!
//! Applied versions are recorded in `migrations`; each pending script runs in
//! its own transaction.

use crate::error::Result;
use sqlx::sqlite::SqlitePool;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "kv_store",
    sql: include_str!("migrations/001_initial_schema.sql"),
}];

/// Highest applied migration, 0 for a fresh database
pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Create the bookkeeping table and apply every pending migration
pub async fn initialize_database(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    let current = schema_version(pool).await?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > current);

    for migration in pending {
        tracing::info!("Applying migration {} ({})", migration.version, migration.name);

        let mut tx = pool.begin().await?;
        for statement in migration.sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO migrations (version) VALUES (?)")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    tracing::debug!("Schema at version {}", schema_version(pool).await?);
    Ok(())
}
