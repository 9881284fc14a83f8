//! Repository layer for database operations
//!
//! The local store keeps every collection as one JSON value under a fixed key,
//! so the repository is a small key-value layer over the `kv_store` table.

use crate::error::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a raw value
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Insert or overwrite a raw value
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Set {} ({} bytes)", key, value.len());
        Ok(())
    }


    /// Get and decode a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and store a JSON value
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_value(key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_memory_pool;
    use std::collections::BTreeMap;

    async fn create_test_repo() -> Repository {
        Repository::new(create_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_set_and_get_value() {
        let repo = create_test_repo().await;

        assert_eq!(repo.get_value("xiwen_pin").await.unwrap(), None);

        repo.set_value("xiwen_pin", "1234").await.unwrap();
        assert_eq!(repo.get_value("xiwen_pin").await.unwrap(), Some("1234".to_string()));

        // Update existing
        repo.set_value("xiwen_pin", "8888").await.unwrap();
        assert_eq!(repo.get_value("xiwen_pin").await.unwrap(), Some("8888".to_string()));
    }

    #[tokio::test]
    async fn test_json_values() {
        let repo = create_test_repo().await;

        let mut settings = BTreeMap::new();
        settings.insert("theme".to_string(), "pink".to_string());
        repo.set_json("xiwen_settings", &settings).await.unwrap();

        let loaded: Option<BTreeMap<String, String>> =
            repo.get_json("xiwen_settings").await.unwrap();
        assert_eq!(loaded, Some(settings));
    }

    #[tokio::test]
    async fn test_corrupt_json_is_an_error() {
        let repo = create_test_repo().await;

        repo.set_value("xiwen_tasks", "[{broken").await.unwrap();
        let result: Result<Option<Vec<String>>> = repo.get_json("xiwen_tasks").await;
        assert!(result.is_err());
    }
}
